use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tgstyle_contracts::classification::{ClassificationResult, ResultSource};
use tgstyle_contracts::events::{AnalysisEvent, EventWriter};
use tgstyle_contracts::storage::{AnalysisRecord, GeneratedText};
use tracing::{info, warn};

pub mod commentary;
pub mod compress;
pub mod resolver;
pub mod sources;
pub mod telegram;

pub use commentary::RequestOrigin;
pub use compress::{CompressError, CompressedImage, CompressionProfile, ImageCompressor};
pub use resolver::{
    ClassificationResolver, ClassificationSource, Resolution, ResolveError, ResolverConfig,
    SourceAttempt,
};
pub use telegram::{AuthMode, InitData, InitDataError, InitDataValidator, TelegramUser};

/// Everything `/api/analyze` hands back for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub origin: RequestOrigin,
    pub classification: ClassificationResult,
    pub analysis_html: String,
    pub comments: Vec<String>,
    pub attempts: Vec<SourceAttempt>,
}

impl AnalysisOutcome {
    /// Every real source failed and the answer is a simulation.
    pub fn degraded(&self) -> bool {
        !self.attempts.is_empty() && self.classification.source == ResultSource::Simulated
    }
}

/// Resolver plus commentary, shared by the HTTP handlers and the CLI.
pub struct StyleAnalyzer {
    resolver: ClassificationResolver,
    events: Option<EventWriter>,
    rng: Mutex<StdRng>,
}

impl StyleAnalyzer {
    pub fn new(resolver: ClassificationResolver) -> Self {
        Self {
            resolver,
            events: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        let analyzer = Self::new(ClassificationResolver::from_config(config));
        match config.simulation_seed {
            Some(seed) => analyzer.with_seed(seed),
            None => analyzer,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn resolver(&self) -> &ClassificationResolver {
        &self.resolver
    }

    pub fn event_writer(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    /// Runs the full chain over raw photo bytes. Blocks on network I/O.
    pub fn analyze_photo(&self, image: &[u8]) -> Result<AnalysisOutcome, ResolveError> {
        let resolution = self.resolver.resolve(image)?;
        let outcome = self.build_outcome(resolution, RequestOrigin::Photo);
        self.emit_resolved(&outcome, Some(image.len()));
        Ok(outcome)
    }

    /// Pinterest boards are not fetched; the answer is always simulated.
    /// Still blocks on the event log when one is attached.
    pub fn analyze_pinterest(&self, url: &str) -> AnalysisOutcome {
        info!(url = %url, "pinterest analysis requested");
        let resolution = Resolution {
            result: self.resolver.simulate(),
            attempts: Vec::new(),
        };
        let outcome = self.build_outcome(resolution, RequestOrigin::Pinterest);
        self.emit_resolved(&outcome, None);
        outcome
    }

    /// History entry for an outcome, with the photo shrunk to the storage
    /// budget. A photo that cannot be decoded is cut instead.
    pub fn history_record(&self, outcome: &AnalysisOutcome, photo_base64: Option<&str>) -> AnalysisRecord {
        let photo = photo_base64.map(|photo| {
            ImageCompressor::storage()
                .compress_base64(photo, compress::STORAGE_BUDGET_CHARS)
                .unwrap_or_else(|err| {
                    warn!(error = %err, "storage compression failed; truncating photo");
                    compress::truncate_for_storage(photo, compress::STORAGE_BUDGET_CHARS)
                })
        });
        AnalysisRecord {
            photo,
            classification: outcome.classification.clone(),
            generated_text: GeneratedText {
                analysis: outcome.analysis_html.clone(),
                comments: outcome.comments.clone(),
            },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    fn build_outcome(&self, resolution: Resolution, origin: RequestOrigin) -> AnalysisOutcome {
        let Resolution { result, attempts } = resolution;
        let degraded = !attempts.is_empty() && result.source == ResultSource::Simulated;
        let comments = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            commentary::comments(result.label, origin, &mut *rng)
        };
        AnalysisOutcome {
            origin,
            analysis_html: commentary::analysis_html(&result, origin, degraded),
            classification: result,
            comments,
            attempts,
        }
    }

    fn emit_resolved(&self, outcome: &AnalysisOutcome, image_bytes: Option<usize>) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let fallback_reason = (!outcome.attempts.is_empty()).then(|| {
            outcome
                .attempts
                .iter()
                .map(|attempt| format!("{}: {}", attempt.source, attempt.error))
                .collect::<Vec<String>>()
                .join("; ")
        });
        let event = AnalysisEvent::AnalysisResolved {
            origin: outcome.origin.as_str().to_string(),
            label: outcome.classification.label,
            confidence: outcome.classification.confidence,
            source: outcome.classification.source,
            image_bytes,
            fallback_reason,
        };
        if let Err(err) = events.record(event) {
            warn!(error = %err, "failed to record analysis event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::{json, Value};
    use tgstyle_contracts::classification::GarmentLabel;
    use tgstyle_contracts::events::EventRecord;

    use super::*;
    use crate::sources::SimulatedSource;

    fn analyzer(events: Option<EventWriter>) -> StyleAnalyzer {
        let analyzer = StyleAnalyzer::new(ClassificationResolver::new(
            Vec::new(),
            SimulatedSource::with_seed(5),
        ))
        .with_seed(5);
        match events {
            Some(events) => analyzer.with_events(events),
            None => analyzer,
        }
    }

    #[test]
    fn photo_analysis_produces_commentary_and_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let analyzer = analyzer(Some(EventWriter::new(&events_path, "test-session")));

        let outcome = analyzer.analyze_photo(&[1u8; 512])?;
        assert_eq!(outcome.origin, RequestOrigin::Photo);
        assert_eq!(outcome.classification.source, ResultSource::Simulated);
        assert!((3..=5).contains(&outcome.comments.len()));
        assert!(outcome.analysis_html.contains("Recommendations"));
        assert!(!outcome.degraded());

        let raw = std::fs::read_to_string(&events_path)?;
        let line = raw.lines().next().unwrap_or_default();
        let event: Value = serde_json::from_str(line)?;
        assert_eq!(event["type"], json!("analysis_resolved"));
        assert_eq!(event["source"], json!("simulated"));
        assert_eq!(event["image_bytes"], json!(512));
        assert_eq!(event["fallback_reason"], Value::Null);

        let record: EventRecord = serde_json::from_str(line)?;
        assert_eq!(record.session_id, "test-session");
        assert!(matches!(
            record.event,
            AnalysisEvent::AnalysisResolved { origin, .. } if origin == "photo"
        ));
        Ok(())
    }

    #[test]
    fn undersized_photo_is_rejected() {
        let err = analyzer(None).analyze_photo(&[0u8; 10]).err();
        assert_eq!(err, Some(ResolveError::InvalidImage { len: 10, min: 100 }));
    }

    #[test]
    fn pinterest_analysis_is_simulated_from_core_labels() {
        let outcome = analyzer(None).analyze_pinterest("https://pinterest.com/board/1");
        assert_eq!(outcome.origin, RequestOrigin::Pinterest);
        assert_eq!(outcome.classification.source, ResultSource::Simulated);
        assert!(GarmentLabel::CORE.contains(&outcome.classification.label));
        assert!(outcome.analysis_html.contains("Pinterest"));
    }

    #[test]
    fn history_record_keeps_small_photo_and_truncates_garbage() -> anyhow::Result<()> {
        let analyzer = analyzer(None);
        let outcome = analyzer.analyze_photo(&[1u8; 512])?;

        let img = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        let small = BASE64.encode(&bytes);
        let record = analyzer.history_record(&outcome, Some(&small));
        assert_eq!(record.photo.as_deref(), Some(small.as_str()));
        assert_eq!(record.classification, outcome.classification);
        assert_eq!(record.generated_text.comments, outcome.comments);

        let garbage = "#".repeat(compress::STORAGE_BUDGET_CHARS + 50);
        let record = analyzer.history_record(&outcome, Some(&garbage));
        assert!(record.photo_is_truncated());
        assert_eq!(
            record.photo.map(|photo| photo.len()),
            Some(compress::STORAGE_BUDGET_CHARS + 3)
        );

        assert!(analyzer.history_record(&outcome, None).photo.is_none());
        Ok(())
    }
}
