use std::fmt;
use std::sync::Arc;

use super::backend::{DigitRecognizer, GlyphRecognizer, RecognizerCapability, TemplateMatcher};

/// The recognizers one scene is built with.
///
/// Every capability is optional. Scenes check for presence before use and
/// treat a missing recognizer as "field not extracted", never as an error.
/// Recognizers are shared read-only, so one set can back several scenes.
#[derive(Clone, Default)]
pub struct RecognizerSet {
    /// Coarse screen matcher gating entry into tracking.
    pub screen: Option<Arc<dyn TemplateMatcher>>,
    pub digits: Option<Arc<dyn DigitRecognizer>>,
    /// Rank letter shown in ranked battles.
    pub rank_letter: Option<Arc<dyn GlyphRecognizer>>,
    pub weapon: Option<Arc<dyn GlyphRecognizer>>,
    pub fes_gender: Option<Arc<dyn GlyphRecognizer>>,
    pub fes_level: Option<Arc<dyn GlyphRecognizer>>,
}

impl RecognizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screen<M: TemplateMatcher + 'static>(mut self, matcher: M) -> Self {
        self.screen = Some(Arc::new(matcher));
        self
    }

    pub fn with_digits<D: DigitRecognizer + 'static>(mut self, digits: D) -> Self {
        self.digits = Some(Arc::new(digits));
        self
    }

    pub fn with_rank_letter<G: GlyphRecognizer + 'static>(mut self, glyph: G) -> Self {
        self.rank_letter = Some(Arc::new(glyph));
        self
    }

    pub fn with_weapon<G: GlyphRecognizer + 'static>(mut self, glyph: G) -> Self {
        self.weapon = Some(Arc::new(glyph));
        self
    }

    pub fn with_fes_gender<G: GlyphRecognizer + 'static>(mut self, glyph: G) -> Self {
        self.fes_gender = Some(Arc::new(glyph));
        self
    }

    pub fn with_fes_level<G: GlyphRecognizer + 'static>(mut self, glyph: G) -> Self {
        self.fes_level = Some(Arc::new(glyph));
        self
    }

    /// Returns true when at least one recognizer offers the capability.
    pub fn supports(&self, capability: RecognizerCapability) -> bool {
        match capability {
            RecognizerCapability::Template => self.screen.is_some(),
            RecognizerCapability::Digits => self.digits.is_some(),
            RecognizerCapability::Glyph => {
                self.rank_letter.is_some()
                    || self.weapon.is_some()
                    || self.fes_gender.is_some()
                    || self.fes_level.is_some()
            }
        }
    }
}

impl fmt::Debug for RecognizerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerSet")
            .field("screen", &self.screen.as_ref().map(|r| r.name().to_string()))
            .field("digits", &self.digits.as_ref().map(|r| r.name().to_string()))
            .field(
                "rank_letter",
                &self.rank_letter.as_ref().map(|r| r.name().to_string()),
            )
            .field("weapon", &self.weapon.as_ref().map(|r| r.name().to_string()))
            .field(
                "fes_gender",
                &self.fes_gender.as_ref().map(|r| r.name().to_string()),
            )
            .field(
                "fes_level",
                &self.fes_level.as_ref().map(|r| r.name().to_string()),
            )
            .finish()
    }
}
