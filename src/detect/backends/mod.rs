pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::MaskMatcher;
pub use stub::{BrightnessMatcher, FixedDigits, FixedGlyph, FixedMatcher};

#[cfg(feature = "backend-tract")]
pub use tract::TractGlyphRecognizer;
