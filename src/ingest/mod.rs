//! Frame acquisition.
//!
//! `CaptureSource` owns a single upstream stream handle and turns raw frames
//! into corrected, time-stamped `Frame`s:
//! - deinterlacing (odd scanlines duplicated from the even line above)
//! - pixel offset correction (uncovered border left as-is)
//! - resize to the canonical output resolution
//! - replay timestamps from the stream position, realtime timestamps from the
//!   wall clock, with a logged fallback to realtime when the position is missing
//!
//! Stream handles available:
//! - `stub://` synthetic streams (tests, demos)
//! - directories of still images replayed at a fixed rate
//! - video files via FFmpeg (feature: ingest-file-ffmpeg)
//! - V4L2 cameras (feature: ingest-v4l2)
//!
//! `read()` and `configure()` are serialised by one mutex so a reader never
//! observes a half-built handle.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use thiserror::Error;

use crate::frame::{self, Frame, CANONICAL_HEIGHT, CANONICAL_WIDTH};
use crate::TimestampMs;

pub use file::ImageSequenceStream;
pub use synthetic::SyntheticStream;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Stream;

/// Prefix selecting the synthetic stream handle.
pub const STUB_SCHEME: &str = "stub://";

/// Default replay rate for image sequences and synthetic streams.
pub const DEFAULT_REPLAY_FPS: u32 = 30;

/// Random pixels flipped per synthetic frame, mimicking HDMI capture noise.
const SYNTHETIC_NOISE_PIXELS: u32 = 3;

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device '{0}' not found")]
    DeviceNotFound(String),
    #[error("device name '{0}' given but no device enumerator is installed")]
    NoEnumerator(String),
    #[error("video file {} not found", .0.display())]
    FileNotFound(PathBuf),
    #[error("unsupported capture target: {0}")]
    Unsupported(String),
    #[error("failed to open {target}: {source}")]
    OpenFailed {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("capture handle for {0} did not open")]
    NotOpened(String),
    #[error("capture lock poisoned")]
    LockPoisoned,
}

// ----------------------------------------------------------------------------
// Configuration types
// ----------------------------------------------------------------------------

/// What to capture from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    /// Camera by numeric index or by enumerated device name.
    Camera(String),
    /// Pre-recorded input replayed with its own timeline.
    File(PathBuf),
    /// Named capture device relaying another application's output.
    Passthrough(String),
}

impl CaptureMode {
    pub fn camera(id: impl Into<String>) -> Self {
        Self::Camera(id.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::Passthrough(name.into())
    }

    fn timing(&self) -> Timing {
        match self {
            CaptureMode::File(_) => Timing::Replay,
            CaptureMode::Camera(_) | CaptureMode::Passthrough(_) => Timing::Realtime,
        }
    }
}

/// Where timestamps come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timing {
    /// Wall-clock milliseconds since the capture source was created.
    Realtime,
    /// Position embedded in the stream.
    Replay,
}

/// Per-configuration capture parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureParams {
    /// Resolution requested from the source.
    pub width: u32,
    pub height: u32,
    /// Pixel offset applied to every frame.
    pub offset: (i32, i32),
    pub deinterlace: bool,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            width: CANONICAL_WIDTH,
            height: CANONICAL_HEIGHT,
            offset: (0, 0),
            deinterlace: false,
        }
    }
}

/// Active capture configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub params: CaptureParams,
    pub timing: Timing,
}

/// Resolved stream target handed to a `StreamOpener`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamTarget {
    Device(u32),
    File(PathBuf),
    Synthetic { name: String, timing: Timing },
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTarget::Device(index) => write!(f, "device #{}", index),
            StreamTarget::File(path) => write!(f, "file {}", path.display()),
            StreamTarget::Synthetic { name, .. } => write!(f, "{} (synthetic)", name),
        }
    }
}

// ----------------------------------------------------------------------------
// Seams
// ----------------------------------------------------------------------------

/// Upstream frame producer.
///
/// Implementations must return promptly; blocking on hardware is their own
/// concern, never the caller's.
pub trait StreamHandle: Send {
    /// Pull one raw frame. `Ok(None)` signals end of stream.
    fn grab(&mut self) -> Result<Option<RgbImage>>;

    /// Position of the last grabbed frame in milliseconds, if the stream knows it.
    fn position_ms(&self) -> Option<f64>;

    /// Request a source resolution. Sources that cannot honour it ignore it.
    fn set_resolution(&mut self, _width: u32, _height: u32) {}

    fn is_opened(&self) -> bool;

    fn release(&mut self) {}
}

/// Builds stream handles for resolved targets.
pub trait StreamOpener: Send + Sync {
    fn open(&self, target: &StreamTarget) -> Result<Box<dyn StreamHandle>, CaptureError>;
}

/// Lists capture devices by name; index in the list is the device index.
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> Vec<String>;
}

/// Opener for the handles compiled into this crate.
#[derive(Clone, Debug)]
pub struct DefaultOpener {
    pub replay_fps: u32,
}

impl Default for DefaultOpener {
    fn default() -> Self {
        Self {
            replay_fps: DEFAULT_REPLAY_FPS,
        }
    }
}

impl StreamOpener for DefaultOpener {
    fn open(&self, target: &StreamTarget) -> Result<Box<dyn StreamHandle>, CaptureError> {
        match target {
            StreamTarget::Synthetic { name, timing } => Ok(Box::new(
                SyntheticStream::new(name, *timing, self.replay_fps)
                    .with_noise(SYNTHETIC_NOISE_PIXELS),
            )),
            StreamTarget::File(path) if path.is_dir() => {
                let stream = ImageSequenceStream::open(path, self.replay_fps).map_err(|e| {
                    CaptureError::OpenFailed {
                        target: target.to_string(),
                        source: e.into(),
                    }
                })?;
                Ok(Box::new(stream))
            }
            StreamTarget::File(path) => {
                #[cfg(feature = "ingest-file-ffmpeg")]
                {
                    let stream = file_ffmpeg::FfmpegFileStream::open(path).map_err(|e| {
                        CaptureError::OpenFailed {
                            target: target.to_string(),
                            source: e.into(),
                        }
                    })?;
                    Ok(Box::new(stream))
                }
                #[cfg(not(feature = "ingest-file-ffmpeg"))]
                {
                    Err(CaptureError::Unsupported(format!(
                        "{} (video files require the ingest-file-ffmpeg feature)",
                        path.display()
                    )))
                }
            }
            StreamTarget::Device(index) => {
                #[cfg(feature = "ingest-v4l2")]
                {
                    let stream = V4l2Stream::open(*index).map_err(|e| CaptureError::OpenFailed {
                        target: target.to_string(),
                        source: e.into(),
                    })?;
                    Ok(Box::new(stream))
                }
                #[cfg(not(feature = "ingest-v4l2"))]
                {
                    Err(CaptureError::Unsupported(format!(
                        "device #{} (cameras require the ingest-v4l2 feature)",
                        index
                    )))
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// CaptureSource
// ----------------------------------------------------------------------------

/// Statistics for a capture source.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub rewinds: u64,
    pub realtime_fallbacks: u64,
    pub last_timestamp_ms: TimestampMs,
    pub target: Option<String>,
    pub timing: Option<Timing>,
}

struct ActiveCapture {
    handle: Box<dyn StreamHandle>,
    config: CaptureConfig,
    target: StreamTarget,
}

#[derive(Default)]
struct CaptureState {
    active: Option<ActiveCapture>,
    last_t: TimestampMs,
    frames_read: u64,
    rewinds: u64,
    realtime_fallbacks: u64,
}

/// Thread-safe frame source over one stream handle.
pub struct CaptureSource {
    state: Mutex<CaptureState>,
    opener: Box<dyn StreamOpener>,
    enumerator: Option<Box<dyn DeviceEnumerator>>,
    output_width: u32,
    output_height: u32,
    launched_at: Instant,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self::with_opener(DefaultOpener::default())
    }

    pub fn with_opener<O: StreamOpener + 'static>(opener: O) -> Self {
        Self {
            state: Mutex::new(CaptureState::default()),
            opener: Box::new(opener),
            enumerator: None,
            output_width: CANONICAL_WIDTH,
            output_height: CANONICAL_HEIGHT,
            launched_at: Instant::now(),
        }
    }

    pub fn with_enumerator<E: DeviceEnumerator + 'static>(mut self, enumerator: E) -> Self {
        self.enumerator = Some(Box::new(enumerator));
        self
    }

    /// Override the canonical output resolution.
    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.output_width = width;
        self.output_height = height;
        self
    }

    /// Tear down the current handle and build a new one.
    ///
    /// The previous handle is released before the new one is opened. On error
    /// the source stays unconfigured until the caller retries.
    pub fn configure(&self, mode: CaptureMode, params: CaptureParams) -> Result<(), CaptureError> {
        let mut state = self.state.lock().map_err(|_| CaptureError::LockPoisoned)?;

        if let Some(mut previous) = state.active.take() {
            log::debug!("CaptureSource: releasing {}", previous.target);
            previous.handle.release();
        }
        state.last_t = 0;

        let target = self.resolve(&mode)?;
        log::info!("CaptureSource: initializing {}", target);

        let mut handle = match self.opener.open(&target) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("CaptureSource: failed to open {}: {}", target, err);
                return Err(err);
            }
        };
        handle.set_resolution(params.width, params.height);
        if !handle.is_opened() {
            handle.release();
            return Err(CaptureError::NotOpened(target.to_string()));
        }

        let timing = mode.timing();
        state.active = Some(ActiveCapture {
            handle,
            config: CaptureConfig {
                mode,
                params,
                timing,
            },
            target,
        });
        Ok(())
    }

    /// Release the current handle, if any.
    pub fn release(&self) {
        match self.state.lock() {
            Ok(mut state) => {
                if let Some(mut active) = state.active.take() {
                    log::debug!("CaptureSource: releasing {}", active.target);
                    active.handle.release();
                }
            }
            Err(_) => log::error!("CaptureSource: lock poisoned during release"),
        }
    }

    /// Next corrected frame, or `None` when unconfigured or the stream ended.
    pub fn read(&self) -> Option<Frame> {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("CaptureSource: lock poisoned during read");
                return None;
            }
        };
        let state = &mut *guard;
        let active = state.active.as_mut()?;

        let mut image = match active.handle.grab() {
            Ok(Some(image)) => image,
            Ok(None) => {
                log::debug!("CaptureSource: end of stream on {}", active.target);
                return None;
            }
            Err(err) => {
                log::warn!("CaptureSource: read failed on {}: {}", active.target, err);
                return None;
            }
        };

        let params = active.config.params;
        if params.deinterlace {
            frame::deinterlace(&mut image);
        }
        let (dx, dy) = params.offset;
        frame::apply_offset(&mut image, dx, dy);

        let mut t = None;
        if active.config.timing == Timing::Replay {
            t = active.handle.position_ms().map(|ms| ms as TimestampMs);
            if t.is_none() {
                log::warn!(
                    "CaptureSource: cannot get stream position on {}; switching to realtime",
                    active.target
                );
                active.config.timing = Timing::Realtime;
                state.realtime_fallbacks += 1;
            }
        }
        let t = t.unwrap_or_else(|| self.launched_at.elapsed().as_millis() as TimestampMs);

        if t < state.last_t {
            log::warn!(
                "CaptureSource: timestamp rewound t={} last_t={}",
                t,
                state.last_t
            );
            state.rewinds += 1;
        }
        state.last_t = t;
        state.frames_read += 1;

        let image = frame::resize_to(image, self.output_width, self.output_height);
        Some(Frame::new(image, t))
    }

    pub fn is_configured(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.active.is_some())
            .unwrap_or(false)
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> Option<CaptureConfig> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.active.as_ref().map(|a| a.config.clone()))
    }

    pub fn stats(&self) -> CaptureStats {
        match self.state.lock() {
            Ok(state) => CaptureStats {
                frames_read: state.frames_read,
                rewinds: state.rewinds,
                realtime_fallbacks: state.realtime_fallbacks,
                last_timestamp_ms: state.last_t,
                target: state.active.as_ref().map(|a| a.target.to_string()),
                timing: state.active.as_ref().map(|a| a.config.timing),
            },
            Err(_) => CaptureStats::default(),
        }
    }

    fn resolve(&self, mode: &CaptureMode) -> Result<StreamTarget, CaptureError> {
        match mode {
            CaptureMode::File(path) => {
                let raw = path.to_string_lossy();
                if raw.starts_with(STUB_SCHEME) {
                    return Ok(StreamTarget::Synthetic {
                        name: raw.into_owned(),
                        timing: Timing::Replay,
                    });
                }
                if raw.contains("://") {
                    return Err(CaptureError::Unsupported(format!(
                        "{} (only local files are supported)",
                        raw
                    )));
                }
                if !path.exists() {
                    return Err(CaptureError::FileNotFound(path.clone()));
                }
                Ok(StreamTarget::File(path.clone()))
            }
            CaptureMode::Camera(id) | CaptureMode::Passthrough(id) => self.resolve_device(id),
        }
    }

    fn resolve_device(&self, id: &str) -> Result<StreamTarget, CaptureError> {
        let id = id.trim();
        if id.starts_with(STUB_SCHEME) {
            return Ok(StreamTarget::Synthetic {
                name: id.to_string(),
                timing: Timing::Realtime,
            });
        }
        if let Ok(index) = id.parse::<u32>() {
            return Ok(StreamTarget::Device(index));
        }
        log::debug!("CaptureSource: looking up device name {}", id);
        let enumerator = self
            .enumerator
            .as_ref()
            .ok_or_else(|| CaptureError::NoEnumerator(id.to_string()))?;
        enumerator
            .enumerate()
            .iter()
            .position(|name| name == id)
            .map(|index| StreamTarget::Device(index as u32))
            .ok_or_else(|| CaptureError::DeviceNotFound(id.to_string()))
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Devices;

    impl DeviceEnumerator for Devices {
        fn enumerate(&self) -> Vec<String> {
            vec!["Built-in Camera".to_string(), "HDMI Grabber".to_string()]
        }
    }

    #[test]
    fn resolves_numeric_and_named_devices() {
        let source = CaptureSource::new().with_enumerator(Devices);
        assert_eq!(
            source.resolve_device("3").unwrap(),
            StreamTarget::Device(3)
        );
        assert_eq!(
            source.resolve_device("HDMI Grabber").unwrap(),
            StreamTarget::Device(1)
        );
        assert!(matches!(
            source.resolve_device("Missing"),
            Err(CaptureError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn named_device_without_enumerator_fails() {
        let source = CaptureSource::new();
        assert!(matches!(
            source.resolve_device("HDMI Grabber"),
            Err(CaptureError::NoEnumerator(_))
        ));
    }

    #[test]
    fn missing_file_is_typed_error() {
        let source = CaptureSource::new();
        let err = source
            .configure(
                CaptureMode::file("/nonexistent/scenewatch/video.mp4"),
                CaptureParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::FileNotFound(_)));
        assert!(!source.is_configured());
        assert!(source.read().is_none());
    }

    #[test]
    fn remote_urls_are_rejected() {
        let source = CaptureSource::new();
        let err = source
            .configure(
                CaptureMode::file("rtsp://camera/stream"),
                CaptureParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::Unsupported(_)));
    }

    #[test]
    fn synthetic_replay_produces_canonical_frames() {
        let source = CaptureSource::new();
        source
            .configure(CaptureMode::file("stub://replay"), CaptureParams::default())
            .unwrap();

        let first = source.read().unwrap();
        let second = source.read().unwrap();
        assert_eq!(first.width(), CANONICAL_WIDTH);
        assert_eq!(first.height(), CANONICAL_HEIGHT);
        assert!(second.timestamp_ms() > first.timestamp_ms());
        assert_eq!(source.stats().frames_read, 2);
        assert_eq!(source.config().unwrap().timing, Timing::Replay);
    }
}
