use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use image::imageops::FilterType;
use serde::Deserialize;
use tgstyle_contracts::classification::{ClassificationResult, GarmentLabel, ResultSource};

use crate::compress::flatten_to_rgb;
use crate::resolver::ClassificationSource;

pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// On-disk layout of the bundled classifier: a single dense layer over the
/// normalized RGB pixels of a fixed-size input, followed by softmax.
#[derive(Debug, Deserialize)]
struct LinearModelFile {
    classes: Vec<String>,
    #[serde(default = "default_input_size")]
    input_width: u32,
    #[serde(default = "default_input_size")]
    input_height: u32,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

#[derive(Debug, Clone)]
pub struct LocalModelSource {
    classes: Vec<GarmentLabel>,
    input_width: u32,
    input_height: u32,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LocalModelSource {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading model {}", path.display()))?;
        let file: LinearModelFile = serde_json::from_str(&raw)
            .with_context(|| format!("model {} is not a valid model file", path.display()))?;
        Self::from_parts(
            file.classes.iter().map(|name| GarmentLabel::parse(name)).collect(),
            file.input_width,
            file.input_height,
            file.weights,
            file.bias,
        )
    }

    pub fn from_parts(
        classes: Vec<GarmentLabel>,
        input_width: u32,
        input_height: u32,
        weights: Vec<Vec<f32>>,
        bias: Vec<f32>,
    ) -> Result<Self> {
        ensure!(!classes.is_empty(), "model declares no classes");
        ensure!(input_width > 0 && input_height > 0, "model input size is empty");
        ensure!(
            weights.len() == classes.len() && bias.len() == classes.len(),
            "model has {} classes but {} weight rows and {} biases",
            classes.len(),
            weights.len(),
            bias.len()
        );
        let features = usize::try_from(input_width)
            .ok()
            .zip(usize::try_from(input_height).ok())
            .and_then(|(width, height)| width.checked_mul(height)?.checked_mul(3));
        let Some(features) = features else {
            bail!("model input {input_width}x{input_height} is too large");
        };
        if let Some(row) = weights.iter().position(|row| row.len() != features) {
            bail!(
                "weight row {row} has {} entries, expected {features}",
                weights[row].len()
            );
        }
        Ok(Self {
            classes,
            input_width,
            input_height,
            weights,
            bias,
        })
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Decodes, resizes to the model input and scales channels into [0,1].
    pub fn preprocess(&self, image: &[u8]) -> Result<Vec<f32>> {
        let decoded = image::load_from_memory(image).context("model input is not a decodable image")?;
        let rgb = flatten_to_rgb(&decoded);
        let resized = image::imageops::resize(
            &rgb,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        Ok(resized
            .into_raw()
            .into_iter()
            .map(|channel| f32::from(channel) / 255.0)
            .collect())
    }

    pub fn forward(&self, features: &[f32]) -> Result<Vec<f32>> {
        let mut logits = Vec::with_capacity(self.classes.len());
        for (row, bias) in self.weights.iter().zip(&self.bias) {
            ensure!(
                row.len() == features.len(),
                "feature length {} does not match model input {}",
                features.len(),
                row.len()
            );
            let dot: f32 = row.iter().zip(features).map(|(w, x)| w * x).sum();
            logits.push(dot + bias);
        }
        Ok(softmax(&logits))
    }
}

impl ClassificationSource for LocalModelSource {
    fn name(&self) -> &str {
        "local_model"
    }

    fn classify(&self, image: &[u8]) -> Result<ClassificationResult> {
        let features = self.preprocess(image)?;
        let probabilities = self.forward(&features)?;
        if probabilities.len() != self.classes.len() {
            bail!(
                "model produced {} outputs for {} classes",
                probabilities.len(),
                self.classes.len()
            );
        }
        let mut best: Option<(usize, f32)> = None;
        for (idx, value) in probabilities.iter().copied().enumerate() {
            if !value.is_finite() {
                bail!("model produced a non-finite probability at index {idx}");
            }
            if best.map(|(_, top)| value > top).unwrap_or(true) {
                best = Some((idx, value));
            }
        }
        let Some((idx, top)) = best else {
            bail!("model produced no outputs");
        };
        Ok(ClassificationResult::new(
            self.classes[idx],
            f64::from(top) * 100.0,
            ResultSource::LocalModel,
        ))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|value| (value - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|value| value / total).collect()
}
