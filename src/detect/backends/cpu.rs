use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{GrayImage, RgbImage};

use crate::detect::backend::TemplateMatcher;
use crate::detect::result::MatchResult;
use crate::frame::white_mask;

/// Default fraction of agreeing pixels required for a match.
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.95;

/// Binary-mask template matcher.
///
/// The region is reduced to a white/not-white mask and compared pixel by
/// pixel with a stored mask (foreground > 127). The score is the fraction of
/// agreeing pixels. A region that is almost entirely background also fails,
/// so a blank screen never matches a sparse mask.
pub struct MaskMatcher {
    label: String,
    mask: GrayImage,
    threshold: f32,
    min_foreground: f32,
}

impl MaskMatcher {
    pub fn new(label: &str, mask: GrayImage) -> Self {
        Self {
            label: label.to_string(),
            mask,
            threshold: DEFAULT_MASK_THRESHOLD,
            min_foreground: 0.05,
        }
    }

    /// Load the mask from an image file (any format the `image` crate decodes).
    pub fn from_file<P: AsRef<Path>>(label: &str, path: P) -> Result<Self> {
        let path = path.as_ref();
        let mask = image::open(path)
            .with_context(|| format!("failed to load mask {}", path.display()))?
            .to_luma8();
        Ok(Self::new(label, mask))
    }

    /// Override the default agreement threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Minimum fraction of foreground pixels the region must show.
    pub fn with_min_foreground(mut self, fraction: f32) -> Self {
        self.min_foreground = fraction;
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }
}

impl TemplateMatcher for MaskMatcher {
    fn name(&self) -> &str {
        &self.label
    }

    fn match_region(&self, region: &RgbImage) -> Result<MatchResult> {
        if region.dimensions() != self.mask.dimensions() {
            return Err(anyhow!(
                "{}: region {:?} does not match mask {:?}",
                self.label,
                region.dimensions(),
                self.mask.dimensions()
            ));
        }

        let observed = white_mask(region);
        let total = observed.as_raw().len();
        if total == 0 {
            return Ok(MatchResult::miss());
        }

        let mut agree = 0usize;
        let mut foreground = 0usize;
        for (&seen, &want) in observed.as_raw().iter().zip(self.mask.as_raw()) {
            let seen = seen > 127;
            if seen {
                foreground += 1;
            }
            if seen == (want > 127) {
                agree += 1;
            }
        }

        let score = agree as f32 / total as f32;
        let enough_foreground = foreground as f32 / total as f32 >= self.min_foreground;
        Ok(MatchResult::new(
            score >= self.threshold && enough_foreground,
            score,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn stripe_mask() -> GrayImage {
        GrayImage::from_fn(10, 4, |x, _| if x < 5 { Luma([255]) } else { Luma([0]) })
    }

    fn stripe_region(split: u32) -> RgbImage {
        RgbImage::from_fn(10, 4, |x, _| {
            if x < split {
                Rgb([250, 250, 250])
            } else {
                Rgb([20, 40, 200])
            }
        })
    }

    #[test]
    fn mask_matcher_scores_agreement() {
        let matcher = MaskMatcher::new("stripe", stripe_mask());

        let exact = matcher.match_region(&stripe_region(5)).unwrap();
        assert!(exact.matched);
        assert_eq!(exact.score, 1.0);

        let off = matcher.match_region(&stripe_region(7)).unwrap();
        assert!(!off.matched);
        assert!((off.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn blank_region_never_matches() {
        let mask = GrayImage::from_pixel(10, 4, Luma([0]));
        let matcher = MaskMatcher::new("sparse", mask);
        let result = matcher
            .match_region(&RgbImage::from_pixel(10, 4, Rgb([0, 0, 0])))
            .unwrap();
        assert_eq!(result.score, 1.0);
        assert!(!result.matched);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let matcher = MaskMatcher::new("stripe", stripe_mask());
        assert!(matcher.match_region(&RgbImage::new(3, 3)).is_err());
    }
}
