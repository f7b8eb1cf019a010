use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use image::{Rgb, RgbImage};

use scenewatch::{
    CaptureError, CaptureMode, CaptureParams, CaptureSource, DeviceEnumerator, StreamHandle,
    StreamOpener, StreamTarget, Timing,
};

/// One scripted frame: pixels and the position the stream reports for it.
#[derive(Clone)]
struct Step {
    image: RgbImage,
    position_ms: Option<f64>,
}

struct ScriptedStream {
    steps: Vec<Step>,
    next: usize,
    opened: bool,
    releases: Arc<AtomicUsize>,
}

impl StreamHandle for ScriptedStream {
    fn grab(&mut self) -> Result<Option<RgbImage>> {
        if !self.opened {
            return Ok(None);
        }
        let step = self.steps.get(self.next).map(|s| s.image.clone());
        self.next += 1;
        Ok(step)
    }

    fn position_ms(&self) -> Option<f64> {
        self.next
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .and_then(|s| s.position_ms)
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn release(&mut self) {
        self.opened = false;
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct ScriptedOpener {
    steps: Vec<Step>,
    opened: Arc<Mutex<Vec<StreamTarget>>>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }
}

impl StreamOpener for ScriptedOpener {
    fn open(&self, target: &StreamTarget) -> Result<Box<dyn StreamHandle>, CaptureError> {
        self.opened.lock().unwrap().push(target.clone());
        Ok(Box::new(ScriptedStream {
            steps: self.steps.clone(),
            next: 0,
            opened: true,
            releases: Arc::clone(&self.releases),
        }))
    }
}

/// Never-ending realtime stream that records grabs after its own release.
struct EndlessStream {
    released: bool,
    late_grabs: Arc<AtomicUsize>,
}

impl StreamHandle for EndlessStream {
    fn grab(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            self.late_grabs.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }
        Ok(Some(solid(16, 9, 120)))
    }

    fn position_ms(&self) -> Option<f64> {
        None
    }

    fn is_opened(&self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[derive(Default)]
struct EndlessOpener {
    late_grabs: Arc<AtomicUsize>,
}

impl StreamOpener for EndlessOpener {
    fn open(&self, _target: &StreamTarget) -> Result<Box<dyn StreamHandle>, CaptureError> {
        Ok(Box::new(EndlessStream {
            released: false,
            late_grabs: Arc::clone(&self.late_grabs),
        }))
    }
}

struct Devices;

impl DeviceEnumerator for Devices {
    fn enumerate(&self) -> Vec<String> {
        vec!["Integrated Camera".to_string(), "HDMI Capture".to_string()]
    }
}

fn solid(width: u32, height: u32, v: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([v, v, v]))
}

fn steps(positions: &[Option<f64>]) -> Vec<Step> {
    positions
        .iter()
        .map(|&position_ms| Step {
            image: solid(16, 9, 100),
            position_ms,
        })
        .collect()
}

fn small_source(opener: ScriptedOpener) -> CaptureSource {
    CaptureSource::with_opener(opener).with_output_size(16, 9)
}

fn replay() -> CaptureMode {
    CaptureMode::file("stub://recording")
}

#[test]
fn unconfigured_source_reads_nothing() {
    let source = small_source(ScriptedOpener::new(steps(&[Some(0.0)])));
    assert!(!source.is_configured());
    assert!(source.read().is_none());
}

#[test]
fn replay_timestamps_follow_stream_position() {
    let source = small_source(ScriptedOpener::new(steps(&[
        Some(0.0),
        Some(33.4),
        Some(66.8),
    ])));
    source.configure(replay(), CaptureParams::default()).unwrap();

    let ts: Vec<i64> = std::iter::from_fn(|| source.read())
        .map(|f| f.timestamp_ms())
        .collect();
    assert_eq!(ts, vec![0, 33, 66]);

    let stats = source.stats();
    assert_eq!(stats.frames_read, 3);
    assert_eq!(stats.rewinds, 0);
    assert_eq!(stats.timing, Some(Timing::Replay));
}

#[test]
fn missing_position_falls_back_to_realtime() {
    let source = small_source(ScriptedOpener::new(steps(&[None, Some(500.0)])));
    source.configure(replay(), CaptureParams::default()).unwrap();

    assert!(source.read().is_some());
    let stats = source.stats();
    assert_eq!(stats.realtime_fallbacks, 1);
    assert_eq!(stats.timing, Some(Timing::Realtime));

    // Stays realtime for the rest of the stream.
    assert!(source.read().is_some());
    assert_eq!(source.stats().realtime_fallbacks, 1);
}

#[test]
fn rewind_is_reported_not_fatal() {
    let source = small_source(ScriptedOpener::new(steps(&[
        Some(1_000.0),
        Some(500.0),
        Some(600.0),
    ])));
    source.configure(replay(), CaptureParams::default()).unwrap();

    let ts: Vec<i64> = std::iter::from_fn(|| source.read())
        .map(|f| f.timestamp_ms())
        .collect();
    assert_eq!(ts, vec![1_000, 500, 600]);
    assert_eq!(source.stats().rewinds, 1);
}

#[test]
fn reconfigure_releases_previous_handle() {
    let opener = ScriptedOpener::new(steps(&[Some(0.0)]));
    let releases = Arc::clone(&opener.releases);
    let source = small_source(opener);

    source.configure(replay(), CaptureParams::default()).unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    source
        .configure(CaptureMode::camera("0"), CaptureParams::default())
        .unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(source.stats().timing, Some(Timing::Realtime));

    source.release();
    assert_eq!(releases.load(Ordering::SeqCst), 2);
    assert!(!source.is_configured());
}

#[test]
fn failed_configure_leaves_source_unconfigured() {
    let opener = ScriptedOpener::new(steps(&[Some(0.0)]));
    let releases = Arc::clone(&opener.releases);
    let source = small_source(opener);
    source.configure(replay(), CaptureParams::default()).unwrap();

    let err = source
        .configure(
            CaptureMode::file("/nonexistent/scenewatch/recording.mp4"),
            CaptureParams::default(),
        )
        .unwrap_err();
    assert!(matches!(err, CaptureError::FileNotFound(_)));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(!source.is_configured());
    assert!(source.read().is_none());
}

#[test]
fn camera_name_resolves_through_enumerator() {
    let opener = ScriptedOpener::new(steps(&[Some(0.0)]));
    let opened = Arc::clone(&opener.opened);
    let source = small_source(opener).with_enumerator(Devices);

    source
        .configure(CaptureMode::passthrough("HDMI Capture"), CaptureParams::default())
        .unwrap();
    assert_eq!(*opened.lock().unwrap(), vec![StreamTarget::Device(1)]);

    let err = source
        .configure(CaptureMode::camera("Missing Cam"), CaptureParams::default())
        .unwrap_err();
    assert!(matches!(err, CaptureError::DeviceNotFound(_)));
}

#[test]
fn deinterlace_then_offset_then_resize() {
    // Row y holds value 10 * y so scanline operations are visible.
    let image = RgbImage::from_fn(8, 6, |x, y| Rgb([(10 * y) as u8, x as u8, 0]));
    let opener = ScriptedOpener::new(vec![Step {
        image: image.clone(),
        position_ms: Some(0.0),
    }]);
    let source = CaptureSource::with_opener(opener).with_output_size(8, 6);
    let params = CaptureParams {
        width: 8,
        height: 6,
        offset: (3, -2),
        deinterlace: true,
    };
    source.configure(replay(), params).unwrap();
    let frame = source.read().unwrap();
    let out = frame.image();

    // After deinterlacing, row y carries row y & !1.
    let deinterlaced = |x: u32, y: u32| Rgb([(10 * (y & !1)) as u8, x as u8, 0]);
    for y in 0..6 {
        for x in 0..8 {
            let expected = if x >= 3 && y < 4 {
                deinterlaced(x - 3, y + 2)
            } else {
                deinterlaced(x, y)
            };
            assert_eq!(*out.get_pixel(x, y), expected, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn frames_are_resized_to_output_resolution() {
    let opener = ScriptedOpener::new(steps(&[Some(0.0)]));
    let source = CaptureSource::with_opener(opener);
    source.configure(replay(), CaptureParams::default()).unwrap();
    let frame = source.read().unwrap();
    assert_eq!((frame.width(), frame.height()), (1280, 720));
}

#[test]
fn reconfigure_while_reading_is_serialised() {
    let opener = EndlessOpener::default();
    let late_grabs = Arc::clone(&opener.late_grabs);
    let source = CaptureSource::with_opener(opener).with_output_size(32, 18);
    source
        .configure(CaptureMode::camera("0"), CaptureParams::default())
        .unwrap();
    let done = AtomicBool::new(false);

    let frames = std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut frames = 0u64;
            while !done.load(Ordering::SeqCst) {
                if let Some(frame) = source.read() {
                    assert_eq!((frame.width(), frame.height()), (32, 18));
                    frames += 1;
                }
            }
            frames
        });

        for i in 0..300 {
            if i % 3 == 2 {
                source.release();
            } else {
                let device = if i % 2 == 0 { "0" } else { "1" };
                source
                    .configure(CaptureMode::camera(device), CaptureParams::default())
                    .unwrap();
            }
            std::thread::yield_now();
        }
        done.store(true, Ordering::SeqCst);
        reader.join().expect("reader thread panicked")
    });

    assert_eq!(late_grabs.load(Ordering::SeqCst), 0);
    assert_eq!(source.stats().frames_read, frames);
}
