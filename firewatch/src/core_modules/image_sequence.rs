// THEORY:
// `ImageSequenceSource` plays a directory of still images as a camera. Files are
// read in name order, so `frame_0001.jpg, frame_0002.jpg, ...` replays a recording
// frame by frame. It is the default source of the monitor and the one the tests use.
//
// The cursor moves past a file before decoding it. An unreadable file therefore
// costs one restart and is skipped, instead of failing the same way forever.

use crate::pipeline::{FlipMode, FrameSource, SourceError};
use image::RgbImage;
use image::imageops;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    flip: Option<FlipMode>,
    frame_interval: Option<Duration>,
    looping: bool,
}

impl ImageSequenceSource {
    /// Lists the image files of `dir`. An empty directory is an error.
    pub fn open(dir: impl Into<PathBuf>, flip: Option<FlipMode>) -> Result<Self, SourceError> {
        let dir = dir.into();
        let files = list_images(&dir)?;
        if files.is_empty() {
            return Err(SourceError::Open(format!("no images in {}", dir.display())));
        }
        debug!(dir = %dir.display(), frames = files.len(), "image sequence opened");
        Ok(Self {
            dir,
            files,
            cursor: 0,
            flip,
            frame_interval: None,
            looping: false,
        })
    }

    /// Sleeps this long before each frame, to pace playback like a live camera.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Starts over from the first file at the end instead of ending the stream.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    type Frame = RgbImage;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if self.cursor >= self.files.len() {
            if !self.looping || self.files.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;
        let frame = image::open(path)?.to_rgb8();
        Ok(Some(apply_flip(frame, self.flip)))
    }

    /// Re-lists the directory and keeps the position.
    fn reopen(&mut self) -> Result<(), SourceError> {
        self.files = list_images(&self.dir)?;
        self.cursor = self.cursor.min(self.files.len());
        Ok(())
    }
}

pub fn apply_flip(frame: RgbImage, flip: Option<FlipMode>) -> RgbImage {
    match flip {
        None => frame,
        Some(FlipMode::Vertical) => imageops::flip_vertical(&frame),
        Some(FlipMode::Horizontal) => imageops::flip_horizontal(&frame),
        Some(FlipMode::Both) => imageops::rotate180(&frame),
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frames(dir: &Path, colors: &[[u8; 3]]) {
        for (i, rgb) in colors.iter().enumerate() {
            RgbImage::from_pixel(4, 2, Rgb(*rgb))
                .save(dir.join(format!("frame_{i:04}.png")))
                .unwrap();
        }
    }

    #[test]
    fn plays_files_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &[[1, 1, 1], [2, 2, 2], [3, 3, 3]]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), None).unwrap();
        assert_eq!(source.len(), 3);
        for expected in 1..=3u8 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.get_pixel(0, 0).0, [expected; 3]);
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn looping_wraps_around() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &[[7, 7, 7]]);
        let mut source = ImageSequenceSource::open(dir.path(), None).unwrap().looping(true);
        for _ in 0..3 {
            assert!(source.next_frame().unwrap().is_some());
        }
    }

    #[test]
    fn corrupt_file_fails_once_and_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        write_frames(dir.path(), &[[5, 5, 5]]);

        let mut source = ImageSequenceSource::open(dir.path(), None).unwrap();
        assert!(source.next_frame().is_err());
        source.reopen().unwrap();
        assert!(source.next_frame().unwrap().is_some());
    }

    #[test]
    fn empty_directory_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), None),
            Err(SourceError::Open(_))
        ));
    }

    #[test]
    fn flips_follow_the_flip_code() {
        let mut frame = RgbImage::new(2, 2);
        frame.put_pixel(0, 0, Rgb([255, 0, 0]));

        let horizontal = apply_flip(frame.clone(), FlipMode::from_code(1));
        assert_eq!(horizontal.get_pixel(1, 0).0, [255, 0, 0]);
        let vertical = apply_flip(frame.clone(), FlipMode::from_code(0));
        assert_eq!(vertical.get_pixel(0, 1).0, [255, 0, 0]);
        let both = apply_flip(frame.clone(), FlipMode::from_code(-1));
        assert_eq!(both.get_pixel(1, 1).0, [255, 0, 0]);
        assert_eq!(apply_flip(frame.clone(), None), frame);
    }
}
