use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of one template comparison.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Similarity in `0.0..=1.0`.
    pub score: f32,
}

impl MatchResult {
    pub fn new(matched: bool, score: f32) -> Self {
        Self { matched, score }
    }

    pub fn miss() -> Self {
        Self::default()
    }
}

/// Labels of a classified glyph keyed by locale (`"en"`, `"ja"`, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlyphLabels(BTreeMap<String, String>);

impl GlyphLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locale: &str, label: &str) -> Self {
        self.0.insert(locale.to_string(), label.to_string());
        self
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        self.0.get(locale).map(String::as_str)
    }

    /// The English label if present, otherwise the first label.
    pub fn primary(&self) -> Option<&str> {
        self.get("en")
            .or_else(|| self.0.values().next().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for GlyphLabels {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
