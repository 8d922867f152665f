use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tgstyle_contracts::classification::ClassificationResult;
use tracing::{debug, info, warn};

use crate::sources::{ExternalInferenceSource, LocalModelSource, SimulatedSource};

/// Anything shorter cannot be a real encoded photo.
pub const MIN_IMAGE_BYTES: usize = 100;
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INFERENCE_PROMPT: &str = "Describe in detail what clothing items you see in this image. What type, color, style and material? Use precise fashion terms.";

/// One step of the classification chain.
pub trait ClassificationSource: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, image: &[u8]) -> Result<ClassificationResult>;
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub service_endpoint: Option<String>,
    pub model_path: Option<PathBuf>,
    pub health_timeout: Duration,
    pub inference_timeout: Duration,
    pub prompt: String,
    pub simulation_seed: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            service_endpoint: None,
            model_path: None,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            prompt: DEFAULT_INFERENCE_PROMPT.to_string(),
            simulation_seed: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid image: {len} bytes is below the {min}-byte minimum")]
    InvalidImage { len: usize, min: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub result: ClassificationResult,
    pub attempts: Vec<SourceAttempt>,
}

impl Resolution {
    /// Why the chain fell past earlier sources, if it did.
    pub fn fallback_reason(&self) -> Option<String> {
        if self.attempts.is_empty() {
            return None;
        }
        Some(
            self.attempts
                .iter()
                .map(|attempt| format!("{}: {}", attempt.source, attempt.error))
                .collect::<Vec<String>>()
                .join("; "),
        )
    }
}

/// Priority-ordered chain of classification sources with a simulation that
/// always answers last.
pub struct ClassificationResolver {
    sources: Vec<Box<dyn ClassificationSource>>,
    fallback: SimulatedSource,
}

impl ClassificationResolver {
    pub fn new(sources: Vec<Box<dyn ClassificationSource>>, fallback: SimulatedSource) -> Self {
        Self { sources, fallback }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        let mut sources: Vec<Box<dyn ClassificationSource>> = Vec::new();

        if let Some(endpoint) = config.service_endpoint.as_deref() {
            if !endpoint.trim().is_empty() {
                sources.push(Box::new(
                    ExternalInferenceSource::new(endpoint, config.prompt.clone())
                        .with_timeouts(config.health_timeout, config.inference_timeout),
                ));
            }
        }

        if let Some(path) = config.model_path.as_deref() {
            match LocalModelSource::load(path) {
                Ok(model) => {
                    info!(path = %path.display(), classes = model.class_count(), "local model loaded");
                    sources.push(Box::new(model));
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %format!("{err:#}"), "local model unavailable");
                }
            }
        }

        let fallback = match config.simulation_seed {
            Some(seed) => SimulatedSource::with_seed(seed),
            None => SimulatedSource::new(),
        };
        Self::new(sources, fallback)
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .iter()
            .map(|source| source.name().to_string())
            .collect();
        names.push(self.fallback.name().to_string());
        names
    }

    /// Runs the chain. Only undersized input is reported; every source failure
    /// falls through to the next source.
    pub fn resolve(&self, image: &[u8]) -> Result<Resolution, ResolveError> {
        if image.len() < MIN_IMAGE_BYTES {
            return Err(ResolveError::InvalidImage {
                len: image.len(),
                min: MIN_IMAGE_BYTES,
            });
        }

        let mut attempts = Vec::new();
        for source in &self.sources {
            match source.classify(image) {
                Ok(result) => {
                    debug!(source = source.name(), label = %result.label, "classification resolved");
                    return Ok(Resolution {
                        result: result.normalized(),
                        attempts,
                    });
                }
                Err(err) => {
                    let error = error_chain_text(&err, 240);
                    warn!(source = source.name(), error = %error, "classification source failed");
                    attempts.push(SourceAttempt {
                        source: source.name().to_string(),
                        error,
                    });
                }
            }
        }

        Ok(Resolution {
            result: self.fallback.simulate(),
            attempts,
        })
    }

    pub fn simulate(&self) -> ClassificationResult {
        self.fallback.simulate()
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    let joined = if parts.is_empty() {
        err.to_string()
    } else {
        parts.join(" | caused by: ")
    };
    truncate_text(&joined, max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
