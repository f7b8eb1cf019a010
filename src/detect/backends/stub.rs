//! Scripted recognizers for tests and synthetic runs.

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DigitRecognizer, GlyphRecognizer, TemplateMatcher};
use crate::detect::result::{GlyphLabels, MatchResult};

/// Returns the same match result for every region.
#[derive(Clone, Debug)]
pub struct FixedMatcher {
    result: Option<MatchResult>,
}

impl FixedMatcher {
    pub fn hit(score: f32) -> Self {
        Self {
            result: Some(MatchResult::new(true, score)),
        }
    }

    pub fn miss() -> Self {
        Self {
            result: Some(MatchResult::miss()),
        }
    }

    /// Every call fails.
    pub fn failing() -> Self {
        Self { result: None }
    }
}

impl TemplateMatcher for FixedMatcher {
    fn name(&self) -> &str {
        "fixed-matcher"
    }

    fn match_region(&self, _region: &RgbImage) -> Result<MatchResult> {
        self.result
            .ok_or_else(|| anyhow!("fixed-matcher configured to fail"))
    }
}

/// Matches when the mean channel value of the region reaches a threshold.
///
/// Handy for synthetic streams: paint the template rectangle white to make a
/// frame "match".
#[derive(Clone, Debug)]
pub struct BrightnessMatcher {
    min_mean: f32,
}

impl BrightnessMatcher {
    pub fn new(min_mean: f32) -> Self {
        Self { min_mean }
    }
}

impl TemplateMatcher for BrightnessMatcher {
    fn name(&self) -> &str {
        "brightness"
    }

    fn match_region(&self, region: &RgbImage) -> Result<MatchResult> {
        let raw = region.as_raw();
        if raw.is_empty() {
            return Err(anyhow!("brightness matcher got an empty region"));
        }
        let mean = raw.iter().map(|&v| f32::from(v)).sum::<f32>() / raw.len() as f32;
        Ok(MatchResult::new(mean >= self.min_mean, mean / 255.0))
    }
}

/// Returns the same number (or failure) for every region.
#[derive(Clone, Debug)]
pub struct FixedDigits {
    value: Option<u32>,
    fail: bool,
}

impl FixedDigits {
    pub fn new(value: Option<u32>) -> Self {
        Self { value, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            value: None,
            fail: true,
        }
    }
}

impl DigitRecognizer for FixedDigits {
    fn name(&self) -> &str {
        "fixed-digits"
    }

    fn match_digits(&self, _region: &RgbImage) -> Result<Option<u32>> {
        if self.fail {
            return Err(anyhow!("fixed-digits configured to fail"));
        }
        Ok(self.value)
    }
}

/// Returns the same labels for every region.
#[derive(Clone, Debug)]
pub struct FixedGlyph {
    labels: Option<GlyphLabels>,
}

impl FixedGlyph {
    pub fn new(labels: Option<GlyphLabels>) -> Self {
        Self { labels }
    }

    pub fn label(locale: &str, label: &str) -> Self {
        Self::new(Some(GlyphLabels::new().with(locale, label)))
    }
}

impl GlyphRecognizer for FixedGlyph {
    fn name(&self) -> &str {
        "fixed-glyph"
    }

    fn classify(&self, _region: &RgbImage) -> Result<Option<GlyphLabels>> {
        Ok(self.labels.clone())
    }
}
