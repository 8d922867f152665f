use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::{GarmentLabel, ResultSource};

/// Everything the backend records in `events.jsonl`.
///
/// Serialized with the variant name in `type`, so a line reads like
/// `{"type":"auth_checked","ok":true,...,"session_id":"srv-..","ts":".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    ServerStarted {
        bind: String,
        sources: Vec<String>,
        auth_mode: String,
    },
    AnalysisResolved {
        origin: String,
        label: GarmentLabel,
        confidence: f64,
        source: ResultSource,
        image_bytes: Option<usize>,
        /// `source: error` for every source that failed before the answer.
        fallback_reason: Option<String>,
    },
    AuthChecked {
        ok: bool,
        user_id: Option<i64>,
        error: Option<String>,
    },
    ClientLogsReceived {
        entries: usize,
        path: String,
    },
}

impl AnalysisEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerStarted { .. } => "server_started",
            Self::AnalysisResolved { .. } => "analysis_resolved",
            Self::AuthChecked { .. } => "auth_checked",
            Self::ClientLogsReceived { .. } => "client_logs_received",
        }
    }
}

/// One line of the log: the event plus the session that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: AnalysisEvent,
    pub session_id: String,
    pub ts: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("event log {path} is not writable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only JSONL sink shared by every request handler of one server.
///
/// The file is opened on the first record and kept open afterwards.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Arc<Mutex<EventSink>>,
}

#[derive(Debug)]
struct EventSink {
    path: PathBuf,
    session_id: String,
    file: Option<File>,
}

impl EventSink {
    fn file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        Ok(self.file.insert(file))
    }
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(EventSink {
                path: path.into(),
                session_id: session_id.into(),
                file: None,
            })),
        }
    }

    /// Stamps `event` and appends it as one line. Blocking file I/O.
    pub fn record(&self, event: AnalysisEvent) -> Result<EventRecord, EventLogError> {
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = EventRecord {
            event,
            session_id: sink.session_id.clone(),
            ts: now_utc_iso(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let path = sink.path.clone();
        let written = sink.file().and_then(|file| file.write_all(&line));
        if let Err(source) = written {
            // Reopen on the next record in case the file was rotated away.
            sink.file = None;
            return Err(EventLogError::Io { path, source });
        }
        Ok(record)
    }
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::*;

    fn resolved() -> AnalysisEvent {
        AnalysisEvent::AnalysisResolved {
            origin: "photo".to_string(),
            label: GarmentLabel::Dress,
            confidence: 88.5,
            source: ResultSource::LocalModel,
            image_bytes: Some(2048),
            fallback_reason: Some("inference_service: connection refused".to_string()),
        }
    }

    #[test]
    fn records_are_tagged_lines_that_read_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let first = writer.record(resolved())?;
        writer.record(AnalysisEvent::AuthChecked {
            ok: false,
            user_id: None,
            error: Some("Hash is missing".to_string()),
        })?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let raw: Value = serde_json::from_str(lines[0])?;
        assert_eq!(raw["type"], json!("analysis_resolved"));
        assert_eq!(raw["label"], json!("dress"));
        assert_eq!(raw["source"], json!("local-model"));
        assert_eq!(raw["session_id"], json!("session-1"));
        DateTime::parse_from_rfc3339(raw["ts"].as_str().unwrap_or(""))?;

        let parsed: EventRecord = serde_json::from_str(lines[0])?;
        assert_eq!(parsed, first);
        let second: EventRecord = serde_json::from_str(lines[1])?;
        assert_eq!(second.event.kind(), "auth_checked");
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "srv");

        let handles: Vec<_> = (0..4)
            .map(|entries| {
                let writer = writer.clone();
                std::thread::spawn(move || {
                    writer.record(AnalysisEvent::ClientLogsReceived {
                        entries,
                        path: "logs/client_logs.txt".to_string(),
                    })
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
        }

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 4);
        for line in content.lines() {
            let record: EventRecord = serde_json::from_str(line)?;
            assert_eq!(record.event.kind(), "client_logs_received");
        }
        Ok(())
    }

    #[test]
    fn unwritable_path_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, "x")?;
        let writer = EventWriter::new(blocker.join("events.jsonl"), "srv");
        let err = writer.record(resolved()).err();
        assert!(matches!(err, Some(EventLogError::Io { .. })));
        Ok(())
    }
}
