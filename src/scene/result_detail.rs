use std::sync::Arc;

use image::GrayImage;

use crate::detect::RecognizerSet;
use crate::events::{EventContext, EVENT_INDIVIDUAL_RESULT, EVENT_RESULT_DETAIL};
use crate::frame::{self, Frame};
use crate::scene::analysis::{self, ResultContext};
use crate::scene::layout::ResultLayout;
use crate::scene::{DebounceWindow, Scene, SceneSettings, SceneState, TickContext};
use crate::TimestampMs;

pub const RESULT_DETAIL_SCENE: &str = "ResultDetail";

/// The per-player result screen shown after a battle.
///
/// Tracking starts on a coarse template match. Once the white text on the
/// right half of the screen stops changing between two ticks, the screen is
/// analysed and `on_result_detail` followed by `on_game_individual_result`
/// are emitted, at most once per suppression window.
pub struct ResultDetailScene {
    recognizers: RecognizerSet,
    layout: ResultLayout,
    settings: SceneSettings,
    state: SceneState,
    window: DebounceWindow,
    /// White mask of the stability region from the previous tracking tick.
    last_region: Option<GrayImage>,
    emitted: u64,
}

impl ResultDetailScene {
    pub fn new(recognizers: RecognizerSet, layout: ResultLayout, settings: SceneSettings) -> Self {
        Self {
            recognizers,
            layout,
            settings,
            state: SceneState::Idle,
            window: DebounceWindow::default(),
            last_region: None,
            emitted: 0,
        }
    }

    pub fn window(&self) -> &DebounceWindow {
        &self.window
    }

    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    /// Number of detections emitted since construction.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Changed pixels between `frame` and the cached region, if one is cached.
    pub fn changed_pixels(&self, frame: &Frame) -> Option<u32> {
        let current = self.stability_mask(frame)?;
        let cached = self.last_region.as_ref()?;
        frame::count_changed_pixels(cached, &current, self.layout.stability_min_delta)
    }

    fn stability_mask(&self, frame: &Frame) -> Option<GrayImage> {
        match frame.region(self.layout.stability) {
            Ok(region) => Some(frame::white_mask(&region)),
            Err(e) => {
                log::debug!("{}: stability region: {:#}", RESULT_DETAIL_SCENE, e);
                None
            }
        }
    }

    /// Coarse predicate. Errors and a missing matcher count as no match.
    fn coarse_match(&self, frame: &Frame) -> bool {
        let Some(matcher) = self.recognizers.screen.as_ref() else {
            return false;
        };
        let outcome = frame
            .region(self.layout.screen)
            .and_then(|region| matcher.match_region(&region));
        match outcome {
            Ok(result) => result.matched,
            Err(e) => {
                log::debug!("{}: {} failed: {:#}", RESULT_DETAIL_SCENE, matcher.name(), e);
                false
            }
        }
    }

    fn transition(&mut self, next: SceneState, t: TimestampMs) {
        if self.state != next {
            log::debug!("{}: {} -> {} at {} ms", RESULT_DETAIL_SCENE, self.state, next, t);
            self.state = next;
        }
    }

    fn tick_idle(&mut self, frame: &Frame, ctx: &mut TickContext<'_>) -> bool {
        let t = frame.timestamp_ms();
        if self.window.event_within(t, self.settings.suppress_ms) {
            return false;
        }
        if self
            .settings
            .exclusive_with
            .iter()
            .any(|other| ctx.matched_last_tick(other))
        {
            return false;
        }

        let matched = self.coarse_match(frame);
        if matched {
            self.window.start_match(t);
            self.last_region = None;
            self.transition(SceneState::Tracking, t);
        }
        matched
    }

    fn tick_tracking(&mut self, frame: &Frame, ctx: &mut TickContext<'_>) -> bool {
        let t = frame.timestamp_ms();
        let matched = self.coarse_match(frame);

        let mut stable = false;
        if matched {
            self.window.record_match(t);
            let current = self.stability_mask(frame);
            if let (Some(cached), Some(current)) = (self.last_region.as_ref(), current.as_ref()) {
                stable = frame::count_changed_pixels(cached, current, self.layout.stability_min_delta)
                    .is_some_and(|changed| changed < self.settings.stable_max_pixels);
            }
            self.last_region = current;
        }

        if stable {
            if self.window.event_within(t, self.settings.suppress_ms) {
                log::debug!("{}: suppressed at {} ms", RESULT_DETAIL_SCENE, t);
            } else {
                self.emit(frame, ctx);
                self.window.record_event(t);
            }
        }

        if matched {
            return true;
        }

        if !self.window.matched_within(t, self.settings.chatter_ms) {
            self.window.end_match(t);
            self.last_region = None;
            self.transition(SceneState::Idle, t);
        }
        false
    }

    fn analyze(&self, frame: &Frame) -> (ResultContext, Frame) {
        let auto = self
            .recognizers
            .screen
            .as_ref()
            .filter(|_| self.settings.auto_offset);
        let (image, offset) = match auto {
            Some(matcher) => analysis::auto_offset(frame.image(), &**matcher, self.layout.screen),
            None => (frame.image().clone(), (0, 0)),
        };
        let mut result = analysis::analyze(&image, &self.layout, &self.recognizers);
        result.offset = offset;
        (result, Frame::new(image, frame.timestamp_ms()))
    }

    fn emit(&mut self, frame: &Frame, ctx: &mut TickContext<'_>) {
        let (result, analysed) = self.analyze(frame);
        log::info!(
            "{}: result at {} ms ({} entries, won={:?}, fes={})",
            RESULT_DETAIL_SCENE,
            frame.timestamp_ms(),
            result.players.len(),
            result.won,
            result.is_fes
        );

        let event = EventContext {
            scene: RESULT_DETAIL_SCENE.to_string(),
            timestamp_ms: frame.timestamp_ms(),
            frame_width: frame.width(),
            frame_height: frame.height(),
            result: Arc::new(result),
            frame: Arc::new(analysed),
        };
        ctx.emit(EVENT_RESULT_DETAIL, &event);
        ctx.emit(EVENT_INDIVIDUAL_RESULT, &event);
        self.emitted += 1;
    }
}

impl Scene for ResultDetailScene {
    fn name(&self) -> &str {
        RESULT_DETAIL_SCENE
    }

    fn state(&self) -> SceneState {
        self.state
    }

    fn reset(&mut self) {
        self.state = SceneState::Idle;
        self.window.reset();
        self.last_region = None;
    }

    fn tick(&mut self, frame: &Frame, ctx: &mut TickContext<'_>) -> bool {
        match self.state {
            SceneState::Idle => self.tick_idle(frame, ctx),
            SceneState::Tracking => self.tick_tracking(frame, ctx),
        }
    }
}
