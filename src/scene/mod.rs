//! Scene state machines.
//!
//! A scene recognizes one segment type in the frame stream. Every scene
//! cycles between `Idle` and `Tracking` for the lifetime of the stream:
//! - `Idle`: a coarse template predicate gates entry into tracking
//! - `Tracking`: the scene waits for the frame to settle, runs its analysis
//!   once per suppression window and emits events
//!
//! Debounce timestamps and cached comparison regions are owned by each scene
//! instance. Nothing here is process-wide.

use std::collections::HashSet;
use std::fmt;

use crate::events::{EventBus, EventContext};
use crate::frame::Frame;
use crate::TimestampMs;

pub mod analysis;
pub mod layout;
pub mod result_detail;

pub use analysis::{BattleKind, EntryField, PlayerEntry, ResultContext, TeamColor};
pub use layout::{FieldRect, ResultLayout};
pub use result_detail::{ResultDetailScene, RESULT_DETAIL_SCENE};

/// Sentinel for "never happened". Lies outside every window length.
pub const FAR_PAST_MS: TimestampMs = TimestampMs::MIN;

pub const DEFAULT_SUPPRESS_MS: TimestampMs = 30_000;
pub const DEFAULT_CHATTER_MS: TimestampMs = 1_000;
pub const DEFAULT_STABLE_MAX_PIXELS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SceneState {
    Idle,
    Tracking,
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneState::Idle => f.write_str("idle"),
            SceneState::Tracking => f.write_str("tracking"),
        }
    }
}

/// One recognizable segment type.
pub trait Scene: Send {
    fn name(&self) -> &str;

    fn state(&self) -> SceneState;

    /// Back to `Idle` with sentinel timestamps and no cached region.
    fn reset(&mut self);

    /// Feed one frame. Returns whether the scene considers itself matched on
    /// this tick.
    fn tick(&mut self, frame: &Frame, ctx: &mut TickContext<'_>) -> bool;
}

// ----------------------------------------------------------------------------
// Debounce window
// ----------------------------------------------------------------------------

/// Per-scene timestamps used for suppression and anti-chatter decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceWindow {
    /// Last tick on which the coarse predicate held.
    pub last_matched: TimestampMs,
    /// Entry into the current tracking run.
    pub match_start: TimestampMs,
    /// Last emission or tracking exit.
    pub last_event: TimestampMs,
}

impl Default for DebounceWindow {
    fn default() -> Self {
        Self {
            last_matched: FAR_PAST_MS,
            match_start: FAR_PAST_MS,
            last_event: FAR_PAST_MS,
        }
    }
}

impl DebounceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True when `since` lies less than `window_ms` before `now`.
    ///
    /// A rewound clock (`now < since`) counts as no time elapsed, so a rewind
    /// never lets a window expire early.
    pub fn within(now: TimestampMs, since: TimestampMs, window_ms: TimestampMs) -> bool {
        let elapsed = now.saturating_sub(since).max(0);
        elapsed < window_ms
    }

    pub fn matched_within(&self, now: TimestampMs, window_ms: TimestampMs) -> bool {
        Self::within(now, self.last_matched, window_ms)
    }

    pub fn event_within(&self, now: TimestampMs, window_ms: TimestampMs) -> bool {
        Self::within(now, self.last_event, window_ms)
    }

    pub fn start_match(&mut self, now: TimestampMs) {
        self.match_start = now;
        self.last_matched = now;
    }

    pub fn record_match(&mut self, now: TimestampMs) {
        self.last_matched = now;
    }

    /// Leave the current tracking run. The exit counts as an event, so the
    /// suppression window restarts at `now`.
    pub fn end_match(&mut self, now: TimestampMs) {
        self.match_start = FAR_PAST_MS;
        self.last_event = now;
    }

    pub fn record_event(&mut self, now: TimestampMs) {
        self.last_event = now;
    }
}

// ----------------------------------------------------------------------------
// Settings and tick context
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneSettings {
    /// Minimum spacing between two emissions.
    pub suppress_ms: TimestampMs,
    /// Mismatches shorter than this do not end tracking.
    pub chatter_ms: TimestampMs,
    /// Stable when fewer pixels than this changed since the previous tick.
    pub stable_max_pixels: u32,
    /// Search for a small geometric offset before analysis.
    pub auto_offset: bool,
    /// Scenes whose match on the previous tick keeps this one idle.
    pub exclusive_with: Vec<String>,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            suppress_ms: DEFAULT_SUPPRESS_MS,
            chatter_ms: DEFAULT_CHATTER_MS,
            stable_max_pixels: DEFAULT_STABLE_MAX_PIXELS,
            auto_offset: true,
            exclusive_with: vec!["GameTimerIcon".to_string()],
        }
    }
}

/// What a scene may see of the engine during one tick.
pub struct TickContext<'a> {
    bus: &'a mut EventBus,
    previous_matches: &'a HashSet<String>,
}

impl<'a> TickContext<'a> {
    pub fn new(bus: &'a mut EventBus, previous_matches: &'a HashSet<String>) -> Self {
        Self {
            bus,
            previous_matches,
        }
    }

    /// Whether the named scene reported a match on the previous tick.
    pub fn matched_last_tick(&self, scene: &str) -> bool {
        self.previous_matches.contains(scene)
    }

    /// Deliver an event. Returns the number of observers that accepted it.
    pub fn emit(&mut self, event: &str, ctx: &EventContext) -> usize {
        self.bus.emit(event, ctx)
    }
}
