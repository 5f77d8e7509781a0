pub mod blob_detector;
pub mod chunk;
pub mod color_detector;
pub mod image_renderer;
pub mod image_sequence;
pub mod pixel;
