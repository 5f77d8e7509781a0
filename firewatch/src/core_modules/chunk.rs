// THEORY:
// The `Chunk` module groups pixels into small rectangular blocks. It is the bridge
// between single-pixel colour tests and region-level decisions.
//
// Key architectural principles:
// 1.  **Spatial Pooling**: A 640x480 frame at 10x10 chunks is ~3k chunks instead of
//     ~300k pixels. Everything above this layer reasons about chunks.
// 2.  **Noise Reduction**: A chunk is "hot" only when a sizeable fraction of its
//     pixels are fire-coloured, so isolated sensor speckle never seeds a region.
// 3.  **Data Container**: `Chunk` knows how to summarise its own pixels. It does not
//     know about its neighbours.

pub mod chunk {
    use crate::core_modules::pixel::pixel::Pixel;
    use image::RgbImage;

    /// A "dumb" data container representing a rectangular block of pixels.
    #[derive(Debug, Clone)]
    pub struct Chunk {
        /// The width of the chunk in pixels.
        pub width: u32,
        /// The height of the chunk in pixels.
        pub height: u32,
        /// The pixels of the chunk in row-major order.
        pub pixels: Vec<Pixel>,
    }

    impl Chunk {
        pub fn new(width: u32, height: u32, pixels: Vec<Pixel>) -> Self {
            Self { width, height, pixels }
        }

        /// Copies the block at (`x`, `y`) out of `frame`, clipped at the frame edge.
        pub fn extract(frame: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> Self {
            let width = width.min(frame.width().saturating_sub(x));
            let height = height.min(frame.height().saturating_sub(y));
            let mut pixels = Vec::with_capacity((width * height) as usize);
            for row in y..y + height {
                for col in x..x + width {
                    pixels.push(Pixel::from(*frame.get_pixel(col, row)));
                }
            }
            Self::new(width, height, pixels)
        }

        /// Share of pixels that pass the fire-colour test, in 0..1.
        pub fn fire_fraction(&self) -> f32 {
            if self.pixels.is_empty() {
                return 0.0;
            }
            let hot = self.pixels.iter().filter(|p| p.is_fire_colored()).count();
            hot as f32 / self.pixels.len() as f32
        }
    }
}
