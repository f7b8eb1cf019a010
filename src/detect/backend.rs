use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{GlyphLabels, MatchResult};

/// Recognizer capabilities a scene may depend on.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecognizerCapability {
    Template,
    Digits,
    Glyph,
}

/// Template similarity against a known mask or image.
///
/// # Contract
///
/// Calls are synchronous, side-effect-free and individually fallible. An
/// error is treated by callers as "no match" for that call only.
pub trait TemplateMatcher: Send + Sync {
    fn name(&self) -> &str;

    fn match_region(&self, region: &RgbImage) -> Result<MatchResult>;
}

/// Numeric OCR over a small region.
pub trait DigitRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the region holds no readable number.
    fn match_digits(&self, region: &RgbImage) -> Result<Option<u32>>;
}

/// Glyph classifier returning localized labels.
pub trait GlyphRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when no class is close enough.
    fn classify(&self, region: &RgbImage) -> Result<Option<GlyphLabels>>;
}
