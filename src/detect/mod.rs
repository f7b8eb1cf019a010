//! Recognizer capabilities.
//!
//! Scenes never look at pixels to decide what a glyph or number is; they
//! hand cropped regions to recognizers behind these traits. Backends:
//! - `MaskMatcher`: binary-mask template matcher (CPU)
//! - `BrightnessMatcher` and the `Fixed*` stubs: scripted responses for tests
//!   and synthetic runs
//! - `TractGlyphRecognizer`: ONNX classifier (feature: backend-tract)

mod backend;
pub mod backends;
mod result;
mod set;

pub use backend::{DigitRecognizer, GlyphRecognizer, RecognizerCapability, TemplateMatcher};
pub use backends::{BrightnessMatcher, FixedDigits, FixedGlyph, FixedMatcher, MaskMatcher};
pub use result::{GlyphLabels, MatchResult};
pub use set::RecognizerSet;
