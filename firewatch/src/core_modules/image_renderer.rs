// THEORY:
// `JpegRenderer` draws the annotation onto a plain `RgbImage` and encodes it for
// the live feed. The `image` crate has no text drawing, so the status line is drawn
// as a segmented bar in the top-left corner: one segment per frame of the
// threshold, filled up to the current run length. The bar is green while the run
// is below the threshold and red once it reaches it. Segments that would start past
// the right edge are not drawn. Each detected region gets a red outline.

use crate::pipeline::{Annotation, FrameRenderer, Region, RenderError};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);
const OUTLINE_THICKNESS: u32 = 2;
const BELOW_THRESHOLD: Rgb<u8> = Rgb([0, 255, 0]);
const AT_THRESHOLD: Rgb<u8> = Rgb([255, 0, 0]);
const EMPTY_SEGMENT: Rgb<u8> = Rgb([60, 60, 60]);
const BAR_ORIGIN: (u32, u32) = (10, 10);
const SEGMENT_WIDTH: u32 = 14;
const SEGMENT_HEIGHT: u32 = 10;
const SEGMENT_GAP: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct JpegRenderer {
    quality: u8,
}

impl Default for JpegRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegRenderer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn annotate(frame: &mut RgbImage, annotation: &Annotation<'_>) {
        for region in annotation.regions {
            draw_outline(frame, region, OUTLINE, OUTLINE_THICKNESS);
        }
        draw_status_bar(frame, annotation);
    }
}

impl FrameRenderer<RgbImage> for JpegRenderer {
    fn render(&mut self, mut frame: RgbImage, annotation: &Annotation<'_>) -> Result<Vec<u8>, RenderError> {
        Self::annotate(&mut frame, annotation);
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&frame)?;
        Ok(jpeg)
    }
}

fn fill_rect(frame: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let right = x.saturating_add(width).min(frame.width());
    let bottom = y.saturating_add(height).min(frame.height());
    for row in y..bottom {
        for col in x..right {
            frame.put_pixel(col, row, color);
        }
    }
}

fn draw_outline(frame: &mut RgbImage, region: &Region, color: Rgb<u8>, thickness: u32) {
    let Region { x, y, width, height } = *region;
    let t = thickness.min(width).min(height);
    fill_rect(frame, x, y, width, t, color);
    fill_rect(frame, x, y + height.saturating_sub(t), width, t, color);
    fill_rect(frame, x, y, t, height, color);
    fill_rect(frame, x + width.saturating_sub(t), y, t, height, color);
}

fn draw_status_bar(frame: &mut RgbImage, annotation: &Annotation<'_>) {
    let color = if annotation.at_threshold() { AT_THRESHOLD } else { BELOW_THRESHOLD };
    let filled = annotation.consecutive_count.min(annotation.threshold);
    let (x0, y0) = BAR_ORIGIN;
    for segment in 0..annotation.threshold {
        let x = segment
            .checked_mul(SEGMENT_WIDTH + SEGMENT_GAP)
            .and_then(|offset| offset.checked_add(x0));
        let Some(x) = x.filter(|&x| x < frame.width()) else {
            break;
        };
        let fill = if segment < filled { color } else { EMPTY_SEGMENT };
        fill_rect(frame, x, y0, SEGMENT_WIDTH, SEGMENT_HEIGHT, fill);
    }
}
