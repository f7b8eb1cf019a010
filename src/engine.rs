//! Scene engine and tick loop.
//!
//! The engine owns the registered scenes and the event bus. It feeds every
//! frame to every scene in registration order and remembers which scenes
//! matched, so that mutually exclusive scenes can consult the previous tick.
//! It has no match logic of its own.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::EventBus;
use crate::frame::Frame;
use crate::ingest::CaptureSource;
use crate::scene::{Scene, TickContext};

pub struct SceneEngine {
    scenes: Vec<Box<dyn Scene>>,
    bus: EventBus,
    previous_matches: HashSet<String>,
    ticks: u64,
}

impl SceneEngine {
    pub fn new(bus: EventBus) -> Self {
        Self {
            scenes: Vec::new(),
            bus,
            previous_matches: HashSet::new(),
            ticks: 0,
        }
    }

    pub fn register<S: Scene + 'static>(&mut self, scene: S) {
        log::info!("scene registered: {}", scene.name());
        self.scenes.push(Box::new(scene));
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn scenes(&self) -> impl Iterator<Item = &dyn Scene> {
        self.scenes.iter().map(|s| s.as_ref())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Scenes that matched on the most recent tick.
    pub fn matched(&self) -> &HashSet<String> {
        &self.previous_matches
    }

    pub fn reset(&mut self) {
        for scene in self.scenes.iter_mut() {
            scene.reset();
        }
        self.previous_matches.clear();
    }

    /// Feed one frame to every scene. Returns the number of scenes that
    /// matched.
    pub fn tick(&mut self, frame: &Frame) -> usize {
        let mut matched = HashSet::new();
        {
            let mut ctx = TickContext::new(&mut self.bus, &self.previous_matches);
            for scene in self.scenes.iter_mut() {
                if scene.tick(frame, &mut ctx) {
                    matched.insert(scene.name().to_string());
                }
            }
        }
        self.ticks += 1;
        let count = matched.len();
        self.previous_matches = matched;
        count
    }
}

// ----------------------------------------------------------------------------
// Tick loop
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Stop when set.
    pub stop: Option<Arc<AtomicBool>>,
    /// Log capture statistics at this interval.
    pub health_interval: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// `read()` returned no frame.
    EndOfStream,
    MaxFrames,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub reason: StopReason,
}

/// Drive `engine` from `source` on the calling thread.
pub fn run(source: &CaptureSource, engine: &mut SceneEngine, options: &RunOptions) -> RunSummary {
    let mut frames = 0u64;
    let mut last_health = Instant::now();

    let reason = loop {
        if options
            .stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::SeqCst))
        {
            break StopReason::Stopped;
        }
        if options.max_frames.is_some_and(|max| frames >= max) {
            break StopReason::MaxFrames;
        }

        let Some(frame) = source.read() else {
            break StopReason::EndOfStream;
        };
        engine.tick(&frame);
        frames += 1;

        if let Some(interval) = options.health_interval {
            if last_health.elapsed() >= interval {
                let stats = source.stats();
                log::info!(
                    "health: frames={} rewinds={} fallbacks={} last_t={}ms observer_failures={}",
                    stats.frames_read,
                    stats.rewinds,
                    stats.realtime_fallbacks,
                    stats.last_timestamp_ms,
                    engine.bus().failures()
                );
                last_health = Instant::now();
            }
        }
    };

    log::info!("tick loop stopped after {} frames ({:?})", frames, reason);
    RunSummary { frames, reason }
}
