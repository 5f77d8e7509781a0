// THEORY:
// `ColorFireDetector` is the built-in `Detector` for plain RGB frames. It chains the
// three layers of `core_modules` into the single question the alarm asks:
//
//     RgbImage -> Chunk grid -> heat per chunk -> FireBlob -> Region
//
// The knobs of `DetectionConfig` keep their meaning loosely:
// - `scale_factor` sets the chunk edge (8 px at 1.0, ~10 px at the default 1.2).
// - `min_neighbors` is the minimum number of hot chunks a blob needs to count as a
//   region. Zero behaves like one.
// Regions come back hottest first, ranked by the mean heat of their chunks.

use crate::config::DetectionConfig;
use crate::core_modules::blob_detector::blob_detector::{self, FireBlob};
use crate::core_modules::chunk::chunk::Chunk;
use crate::pipeline::{DetectError, Detector, Region};
use image::RgbImage;

const BASE_CHUNK_SIZE: f64 = 8.0;
/// Fire-coloured fraction at which a chunk counts as hot.
pub const DEFAULT_HOT_FRACTION: f32 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct ColorFireDetector {
    chunk_size: u32,
    min_chunks: usize,
    hot_fraction: f32,
}

impl ColorFireDetector {
    pub fn new(chunk_size: u32, min_chunks: usize, hot_fraction: f32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            min_chunks: min_chunks.max(1),
            hot_fraction,
        }
    }

    pub fn from_config(detection: &DetectionConfig) -> Self {
        let chunk_size = (BASE_CHUNK_SIZE * detection.scale_factor).round().max(1.0) as u32;
        let min_chunks = usize::try_from(detection.min_neighbors).unwrap_or(0);
        Self::new(chunk_size, min_chunks, DEFAULT_HOT_FRACTION)
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn min_chunks(&self) -> usize {
        self.min_chunks
    }

    /// Per-chunk heat over a grid that covers the whole frame, partial edge chunks
    /// included.
    fn heatmap(&self, frame: &RgbImage) -> (Vec<f32>, u32, u32) {
        let grid_width = frame.width().div_ceil(self.chunk_size);
        let grid_height = frame.height().div_ceil(self.chunk_size);
        let mut heat = Vec::with_capacity((grid_width * grid_height) as usize);
        for gy in 0..grid_height {
            for gx in 0..grid_width {
                let chunk = Chunk::extract(
                    frame,
                    gx * self.chunk_size,
                    gy * self.chunk_size,
                    self.chunk_size,
                    self.chunk_size,
                );
                heat.push(chunk.fire_fraction());
            }
        }
        (heat, grid_width, grid_height)
    }

    fn to_region(&self, blob: &FireBlob, frame: &RgbImage) -> Region {
        let (min, max) = blob.bounding_box;
        let x = min.x * self.chunk_size;
        let y = min.y * self.chunk_size;
        let right = ((max.x + 1) * self.chunk_size).min(frame.width());
        let bottom = ((max.y + 1) * self.chunk_size).min(frame.height());
        Region {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

impl Detector<RgbImage> for ColorFireDetector {
    fn classify(&mut self, frame: &RgbImage) -> Result<Vec<Region>, DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError("empty frame".to_string()));
        }
        let (heat, grid_width, grid_height) = self.heatmap(frame);
        let mut blobs: Vec<FireBlob> = blob_detector::find_blobs(&heat, grid_width, grid_height, self.hot_fraction)
            .into_iter()
            .filter(|blob| blob.size_in_chunks >= self.min_chunks)
            .collect();
        blobs.sort_by(|a, b| b.mean_heat.total_cmp(&a.mean_heat));
        Ok(blobs.iter().map(|blob| self.to_region(blob, frame)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const NIGHT: Rgb<u8> = Rgb([20, 24, 40]);
    const FLAME: Rgb<u8> = Rgb([255, 150, 20]);

    fn scene(width: u32, height: u32, fires: &[(u32, u32, u32, u32)]) -> RgbImage {
        let mut frame = RgbImage::from_pixel(width, height, NIGHT);
        for &(x, y, w, h) in fires {
            for row in y..y + h {
                for col in x..x + w {
                    frame.put_pixel(col, row, FLAME);
                }
            }
        }
        frame
    }

    #[test]
    fn default_config_maps_to_ten_pixel_chunks() {
        let detector = ColorFireDetector::from_config(&DetectionConfig::default());
        assert_eq!(detector.chunk_size(), 10);
        assert_eq!(detector.min_chunks(), 5);
    }

    #[test]
    fn finds_a_large_fire_and_reports_its_box() {
        let mut detector = ColorFireDetector::new(10, 4, DEFAULT_HOT_FRACTION);
        let frame = scene(100, 80, &[(20, 30, 30, 20)]);
        let regions = detector.classify(&frame).unwrap();
        assert_eq!(regions, vec![Region { x: 20, y: 30, width: 30, height: 20 }]);
    }

    #[test]
    fn small_sparks_are_below_the_size_floor() {
        let mut detector = ColorFireDetector::new(10, 4, DEFAULT_HOT_FRACTION);
        let frame = scene(100, 80, &[(0, 0, 10, 10), (70, 50, 10, 10)]);
        assert!(detector.classify(&frame).unwrap().is_empty());
    }

    #[test]
    fn dark_frame_has_no_fire() {
        let mut detector = ColorFireDetector::from_config(&DetectionConfig::default());
        assert!(detector.classify(&scene(64, 48, &[])).unwrap().is_empty());
    }

    #[test]
    fn regions_are_clipped_to_the_frame() {
        let mut detector = ColorFireDetector::new(10, 1, DEFAULT_HOT_FRACTION);
        let frame = scene(25, 25, &[(20, 20, 5, 5)]);
        assert_eq!(
            detector.classify(&frame).unwrap(),
            vec![Region { x: 20, y: 20, width: 5, height: 5 }]
        );
    }

    #[test]
    fn denser_fire_is_reported_first() {
        let mut detector = ColorFireDetector::new(10, 1, DEFAULT_HOT_FRACTION);
        let mut frame = scene(100, 40, &[(0, 0, 20, 20), (60, 0, 20, 20)]);
        // Thin out the left fire so only half of each of its chunks burns.
        for row in (0..20).step_by(2) {
            for col in 0..20 {
                frame.put_pixel(col, row, NIGHT);
            }
        }
        let regions = detector.classify(&frame).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].x, 60);
        assert_eq!(regions[1].x, 0);
    }

    #[test]
    fn a_fire_touching_a_hotter_one_corner_to_corner_is_not_lost() {
        let mut detector = ColorFireDetector::new(10, 1, DEFAULT_HOT_FRACTION);
        let mut frame = scene(20, 20, &[(0, 0, 10, 10), (10, 10, 10, 10)]);
        for col in 10..20 {
            frame.put_pixel(col, 10, NIGHT);
        }
        let regions = detector.classify(&frame).unwrap();
        assert_eq!(
            regions,
            vec![
                Region { x: 0, y: 0, width: 10, height: 10 },
                Region { x: 10, y: 10, width: 10, height: 10 },
            ]
        );
    }

    #[test]
    fn empty_frame_is_an_error() {
        let mut detector = ColorFireDetector::new(10, 1, DEFAULT_HOT_FRACTION);
        assert!(detector.classify(&RgbImage::new(0, 0)).is_err());
    }
}
