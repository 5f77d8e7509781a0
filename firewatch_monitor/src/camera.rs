// THEORY:
// The OpenCV backend: a live camera or video file as the `FrameSource`, a Haar-style
// cascade as the `Detector`, and OpenCV drawing for the annotated preview. Frames
// stay BGR `Mat`s end to end.
//
// A camera that stops returning frames is treated as a failure (so the frame loop
// reopens it with backoff). A video file that runs out is a normal end of stream.

use firewatch::config::DetectionConfig;
use firewatch::pipeline::{
    Annotation, DetectError, Detector, FlipMode, FrameRenderer, FrameSource, REGION_LABEL, Region, RenderError,
    SourceError,
};
use opencv::core::{self, Mat, Point, Rect, Scalar, Size, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc, objdetect, videoio};
use std::path::PathBuf;
use tracing::info;

// BGR
const RED: (f64, f64, f64) = (0.0, 0.0, 255.0);
const GREEN: (f64, f64, f64) = (0.0, 255.0, 0.0);

fn bgr((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn source_err(err: opencv::Error) -> SourceError {
    SourceError::Read(err.to_string())
}

#[derive(Debug, Clone)]
pub enum CameraInput {
    Device(i32),
    File(PathBuf),
}

pub struct CameraSource {
    input: CameraInput,
    capture: videoio::VideoCapture,
    flip: Option<FlipMode>,
}

impl CameraSource {
    pub fn open(input: CameraInput, flip: Option<FlipMode>) -> Result<Self, SourceError> {
        let capture = open_capture(&input)?;
        info!(?input, "camera opened");
        Ok(Self { input, capture, flip })
    }
}

fn open_capture(input: &CameraInput) -> Result<videoio::VideoCapture, SourceError> {
    let capture = match input {
        CameraInput::Device(index) => videoio::VideoCapture::new(*index, videoio::CAP_ANY),
        CameraInput::File(path) => videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY),
    }
    .map_err(|e| SourceError::Open(e.to_string()))?;
    let opened = capture.is_opened().map_err(|e| SourceError::Open(e.to_string()))?;
    if !opened {
        return Err(SourceError::Open(format!("{input:?} could not be opened")));
    }
    Ok(capture)
}

impl FrameSource for CameraSource {
    type Frame = Mat;

    fn next_frame(&mut self) -> Result<Option<Mat>, SourceError> {
        let mut frame = Mat::default();
        let got = self.capture.read(&mut frame).map_err(source_err)?;
        if !got || frame.empty() {
            return match self.input {
                CameraInput::File(_) => Ok(None),
                CameraInput::Device(index) => Err(SourceError::Read(format!("camera {index} returned no frame"))),
            };
        }
        let Some(flip) = self.flip else {
            return Ok(Some(frame));
        };
        let mut flipped = Mat::default();
        core::flip(&frame, &mut flipped, flip.code()).map_err(source_err)?;
        Ok(Some(flipped))
    }

    fn reopen(&mut self) -> Result<(), SourceError> {
        // Release first so the device is free before it is claimed again.
        let _ = self.capture.release();
        self.capture = open_capture(&self.input)?;
        Ok(())
    }
}

pub struct CascadeDetector {
    classifier: objdetect::CascadeClassifier,
    scale_factor: f64,
    min_neighbors: i32,
}

impl CascadeDetector {
    pub fn from_config(detection: &DetectionConfig) -> Result<Self, DetectError> {
        let path = detection.cascade_path.to_string_lossy();
        let classifier = objdetect::CascadeClassifier::new(&path).map_err(|e| DetectError(e.to_string()))?;
        if classifier.empty().map_err(|e| DetectError(e.to_string()))? {
            return Err(DetectError(format!("cascade model {path} is empty or unreadable")));
        }
        Ok(Self {
            classifier,
            scale_factor: detection.scale_factor,
            min_neighbors: detection.min_neighbors,
        })
    }
}

impl Detector<Mat> for CascadeDetector {
    fn classify(&mut self, frame: &Mat) -> Result<Vec<Region>, DetectError> {
        let fail = |e: opencv::Error| DetectError(e.to_string());
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0).map_err(fail)?;

        let mut found = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &gray,
                &mut found,
                self.scale_factor,
                self.min_neighbors,
                0,
                Size::default(),
                Size::default(),
            )
            .map_err(fail)?;

        Ok(found
            .iter()
            .map(|r| Region {
                x: r.x.max(0) as u32,
                y: r.y.max(0) as u32,
                width: r.width.max(0) as u32,
                height: r.height.max(0) as u32,
            })
            .collect())
    }
}

/// Draws boxes, labels and the `Fire Frames: n/T` line, then JPEG-encodes.
pub struct OpenCvRenderer;

impl FrameRenderer<Mat> for OpenCvRenderer {
    fn render(&mut self, mut frame: Mat, annotation: &Annotation<'_>) -> Result<Vec<u8>, RenderError> {
        let fail = |e: opencv::Error| RenderError::Failed(e.to_string());

        for region in annotation.regions {
            let rect = Rect::new(region.x as i32, region.y as i32, region.width as i32, region.height as i32);
            imgproc::rectangle(&mut frame, rect, bgr(RED), 2, imgproc::LINE_8, 0).map_err(fail)?;
            imgproc::put_text(
                &mut frame,
                REGION_LABEL,
                Point::new(rect.x, rect.y - 10),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.8,
                bgr(RED),
                2,
                imgproc::LINE_8,
                false,
            )
            .map_err(fail)?;
        }

        let status_color = if annotation.at_threshold() { RED } else { GREEN };
        imgproc::put_text(
            &mut frame,
            &annotation.status_text(),
            Point::new(10, 30),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.7,
            bgr(status_color),
            2,
            imgproc::LINE_8,
            false,
        )
        .map_err(fail)?;

        let mut jpeg = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", &frame, &mut jpeg, &Vector::new()).map_err(fail)?;
        Ok(jpeg.to_vec())
    }
}
