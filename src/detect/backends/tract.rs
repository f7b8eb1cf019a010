#![cfg(feature = "backend-tract")]

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DigitRecognizer, GlyphRecognizer};
use crate::detect::result::GlyphLabels;

/// ONNX glyph classifier.
///
/// The model takes a `1x3xHxW` f32 tensor in `0.0..=1.0` and returns one
/// score per class. Class `i` maps to entry `i` of the labels file, a JSON
/// array of `{locale: label}` objects. The region is resized to the model
/// input, so callers can pass crops of any size.
pub struct TractGlyphRecognizer {
    label: String,
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    classes: Vec<GlyphLabels>,
    confidence_threshold: f32,
}

impl TractGlyphRecognizer {
    /// Load a model and its class labels from disk.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        label: &str,
        model_path: P,
        labels_path: L,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels_path = labels_path.as_ref();

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let raw = fs::read_to_string(labels_path)
            .with_context(|| format!("failed to read labels {}", labels_path.display()))?;
        let classes: Vec<GlyphLabels> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse labels {}", labels_path.display()))?;
        if classes.is_empty() {
            return Err(anyhow!("labels file {} is empty", labels_path.display()));
        }

        Ok(Self {
            label: label.to_string(),
            model,
            width,
            height,
            classes,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, region: &RgbImage) -> Tensor {
        let resized;
        let region = if region.dimensions() == (self.width, self.height) {
            region
        } else {
            resized = image::imageops::resize(region, self.width, self.height, FilterType::Triangle);
            &resized
        };
        let pixels = region.as_raw();
        let width = self.width as usize;
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    /// Index and score of the best class.
    fn best_class(&self, outputs: TVec<TValue>) -> Result<Option<(usize, f32)>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let best = scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .fold(None, |best: Option<(usize, f32)>, (idx, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((idx, score)),
            });
        Ok(best)
    }
}

impl GlyphRecognizer for TractGlyphRecognizer {
    fn name(&self) -> &str {
        &self.label
    }

    fn classify(&self, region: &RgbImage) -> Result<Option<GlyphLabels>> {
        if region.width() == 0 || region.height() == 0 {
            return Err(anyhow!("{}: empty region", self.label));
        }
        let input = self.build_input(region);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        match self.best_class(outputs)? {
            Some((idx, score)) if score >= self.confidence_threshold => {
                Ok(self.classes.get(idx).cloned())
            }
            _ => Ok(None),
        }
    }
}

/// Digit classes are labelled with their numeric value.
impl DigitRecognizer for TractGlyphRecognizer {
    fn name(&self) -> &str {
        &self.label
    }

    fn match_digits(&self, region: &RgbImage) -> Result<Option<u32>> {
        let labels = self.classify(region)?;
        Ok(labels
            .as_ref()
            .and_then(GlyphLabels::primary)
            .and_then(|s| s.trim().parse().ok()))
    }
}
