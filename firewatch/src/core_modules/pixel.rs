// THEORY (1D Fire-Colour Heuristics):
// The `Pixel` module is the smallest unit of the colour detector. It holds one RGB
// sample plus heuristics that can be computed from that sample alone, with no
// knowledge of neighbours in space or time. Anything that needs another pixel
// (grouping, connectivity) lives in `chunk` and `blob_detector`.
//
// Flame light is dominated by red, with green trailing and blue lowest. On the HSV
// wheel that pins the hue between red and yellow (0..60 degrees), and real flames are
// both bright and well saturated. A pixel is "fire-coloured" when all three hold:
// 1) channel ordering R >= G >= B with R strictly above B,
// 2) HSV saturation at least `MIN_SATURATION`,
// 3) HSV value at least `MIN_VALUE`.
// The ordering test alone already pins the hue to [0, 60] degrees.

pub mod pixel {
    pub type Channel = u8;
    pub type SaturationHSV = f32;
    pub type ValueHSV = f32;

    /// Minimum HSV saturation for a fire-coloured pixel.
    pub const MIN_SATURATION: SaturationHSV = 0.35;
    /// Minimum HSV value (brightness) for a fire-coloured pixel.
    pub const MIN_VALUE: ValueHSV = 0.6;

    /// A "dumb" data container representing a single RGB pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
    }

    impl From<image::Rgb<u8>> for Pixel {
        fn from(rgb: image::Rgb<u8>) -> Self {
            let [red, green, blue] = rgb.0;
            Pixel { red, green, blue }
        }
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel { red, green, blue }
        }

        fn max_channel(&self) -> Channel {
            self.red.max(self.green).max(self.blue)
        }

        fn min_channel(&self) -> Channel {
            self.red.min(self.green).min(self.blue)
        }

        /// HSV value, the brightest channel in 0..1.
        pub fn value_hsv(&self) -> ValueHSV {
            self.max_channel() as ValueHSV / 255.0
        }

        /// HSV saturation, chroma relative to value. Black is fully unsaturated.
        pub fn saturation_hsv(&self) -> SaturationHSV {
            let max = self.max_channel();
            if max == 0 {
                return 0.0;
            }
            (max - self.min_channel()) as SaturationHSV / max as SaturationHSV
        }

        pub fn has_flame_ordering(&self) -> bool {
            self.red >= self.green && self.green >= self.blue && self.red > self.blue
        }

        pub fn is_fire_colored(&self) -> bool {
            self.has_flame_ordering() && self.saturation_hsv() >= MIN_SATURATION && self.value_hsv() >= MIN_VALUE
        }
    }
}
