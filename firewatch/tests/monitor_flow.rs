use firewatch::core_modules::color_detector::ColorFireDetector;
use firewatch::core_modules::image_renderer::JpegRenderer;
use firewatch::core_modules::image_sequence::ImageSequenceSource;
use firewatch::pipeline::{NullOutlet, StreamOutlet};
use firewatch::{
    AlarmSettings, AlarmStateMachine, EventSink, EventStatus, FrameLoop, Notifier, NotifyError, RestartPolicy,
    SqliteSink, StatusQuery,
};
use futures::future::{BoxFuture, FutureExt};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Handle;

const LOCATION: &str = "26.4567°N, 88.4567°E";

#[derive(Default)]
struct CountingNotifier(AtomicUsize);

impl Notifier for CountingNotifier {
    fn dispatch(&self) -> BoxFuture<'static, Result<(), NotifyError>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }
}

#[derive(Default, Clone)]
struct FrameCounter(Arc<AtomicUsize>);

impl StreamOutlet for FrameCounter {
    fn publish(&self, jpeg: Vec<u8>) {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writes one 80x60 frame per entry; `true` frames carry a 40x30 flame patch.
fn write_recording(dir: &Path, fire: &[bool]) {
    for (i, &burning) in fire.iter().enumerate() {
        let mut frame = RgbImage::from_pixel(80, 60, Rgb([15, 20, 35]));
        if burning {
            for y in 10..40 {
                for x in 20..60 {
                    frame.put_pixel(x, y, Rgb([255, 140, 10]));
                }
            }
        }
        frame.save(dir.join(format!("frame_{i:04}.png"))).unwrap();
    }
}

fn instant() -> RestartPolicy {
    RestartPolicy {
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        max_restarts: 0,
    }
}

fn settings() -> AlarmSettings {
    AlarmSettings {
        threshold: 3,
        location: LOCATION.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn recorded_fire_is_confirmed_persisted_and_cleared() {
    let frames = tempfile::tempdir().unwrap();
    write_recording(frames.path(), &[false, true, true, true, true, false, false]);
    let db = tempfile::tempdir().unwrap();
    let sink = Arc::new(SqliteSink::open(db.path().join("events.db")).unwrap());
    let notifier = Arc::new(CountingNotifier::default());

    let machine = AlarmStateMachine::recover(settings(), sink.clone(), notifier.clone(), Handle::current());
    let status = StatusQuery::new(machine.handle(), sink.clone());
    let outlet = FrameCounter::default();
    let published = outlet.0.clone();
    let pipeline = FrameLoop::new(
        ImageSequenceSource::open(frames.path(), None).unwrap(),
        ColorFireDetector::new(10, 4, 0.3),
        JpegRenderer::default(),
        outlet,
        machine,
        instant(),
    );

    let summary = tokio::task::spawn_blocking(move || pipeline.run()).await.unwrap().unwrap();
    assert_eq!(summary.frames, 7);
    assert_eq!(summary.activations, 1);
    assert_eq!(summary.clearances, 1);
    assert_eq!(published.load(Ordering::SeqCst), 7);
    assert_eq!(notifier.0.load(Ordering::SeqCst), 1);

    let report = status.status();
    assert!(!report.alarm_active);
    assert_eq!(report.full_log.len(), 2);
    assert_eq!(report.full_log[0].status, EventStatus::Cleared);
    assert_eq!(report.full_log[0].confidence, 0);
    assert_eq!(report.full_log[0].gps, "N/A");
    assert_eq!(report.full_log[1].status, EventStatus::Active);
    assert_eq!(report.full_log[1].confidence, 100);
    assert_eq!(report.full_log[1].gps, LOCATION);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_during_a_fire_resumes_without_a_second_alert() {
    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("events.db");

    // First run ends while the fire is still burning.
    {
        let frames = tempfile::tempdir().unwrap();
        write_recording(frames.path(), &[true, true, true]);
        let sink = Arc::new(SqliteSink::open(&db_path).unwrap());
        let notifier = Arc::new(CountingNotifier::default());
        let machine = AlarmStateMachine::recover(settings(), sink, notifier.clone(), Handle::current());
        let pipeline = FrameLoop::new(
            ImageSequenceSource::open(frames.path(), None).unwrap(),
            ColorFireDetector::new(10, 4, 0.3),
            JpegRenderer::default(),
            NullOutlet,
            machine,
            instant(),
        );
        let summary = tokio::task::spawn_blocking(move || pipeline.run()).await.unwrap().unwrap();
        assert_eq!(summary.activations, 1);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    // Second run starts from the stored log.
    let sink = Arc::new(SqliteSink::open(&db_path).unwrap());
    let notifier = Arc::new(CountingNotifier::default());
    let machine = AlarmStateMachine::recover(settings(), sink.clone(), notifier.clone(), Handle::current());
    let status = StatusQuery::new(machine.handle(), sink.clone());
    assert!(status.alarm_active(), "alarm restored from the log");

    let frames = tempfile::tempdir().unwrap();
    write_recording(frames.path(), &[true, true, false]);
    let pipeline = FrameLoop::new(
        ImageSequenceSource::open(frames.path(), None).unwrap(),
        ColorFireDetector::new(10, 4, 0.3),
        JpegRenderer::default(),
        NullOutlet,
        machine,
        instant(),
    );
    let summary = tokio::task::spawn_blocking(move || pipeline.run()).await.unwrap().unwrap();
    assert_eq!(summary.activations, 0);
    assert_eq!(summary.clearances, 1);
    assert_eq!(notifier.0.load(Ordering::SeqCst), 0);

    let history = sink.all().unwrap();
    let statuses: Vec<EventStatus> = history.iter().map(|e| e.record.status()).collect();
    assert_eq!(statuses, vec![EventStatus::Cleared, EventStatus::Active]);
    assert!(!status.alarm_active());
}
