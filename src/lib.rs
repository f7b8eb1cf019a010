//! scenewatch
//!
//! Classifies segments of a live or recorded frame stream into named scenes and
//! extracts structured results from frames that match a target scene.
//!
//! # Architecture
//!
//! ```text
//! CaptureSource ──Frame──▶ SceneEngine ──tick──▶ Scene (Idle ⇄ Tracking)
//!                                                   │ recognizer calls
//!                                                   ▼
//!                                                EventBus ──▶ observers
//! ```
//!
//! The engine is driven by a single consumer thread. The only lock in the
//! core guards the capture handle against reconfiguration during `read()`.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `Rect` and pixel helpers
//! - `ingest`: `CaptureSource` and stream handles (synthetic, image sequence,
//!   FFmpeg, V4L2)
//! - `detect`: recognizer capability traits and backends
//! - `scene`: scene state machines, debounce window, result-screen analysis
//! - `engine`: `SceneEngine` and the tick loop
//! - `events`: `EventBus` and built-in observers
//! - `config`: configuration file and environment loading

pub mod config;
pub mod detect;
pub mod engine;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod scene;

/// Capture timestamp in milliseconds.
///
/// Signed so that the debounce window can hold "far past" sentinels.
pub type TimestampMs = i64;

pub use detect::{
    DigitRecognizer, GlyphLabels, GlyphRecognizer, MatchResult, RecognizerSet, TemplateMatcher,
};
pub use engine::{run, RunOptions, RunSummary, SceneEngine, StopReason};
pub use events::{
    EventBus, EventContext, Observer, EVENT_INDIVIDUAL_RESULT, EVENT_RESULT_DETAIL,
};
pub use frame::{Frame, Rect, CANONICAL_HEIGHT, CANONICAL_WIDTH};
pub use ingest::{
    CaptureConfig, CaptureError, CaptureMode, CaptureParams, CaptureSource, CaptureStats,
    DeviceEnumerator, StreamHandle, StreamOpener, StreamTarget, Timing,
};
pub use scene::{
    BattleKind, DebounceWindow, EntryField, PlayerEntry, ResultContext, ResultDetailScene,
    ResultLayout, Scene, SceneSettings, SceneState, TeamColor, TickContext,
};
