use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::local::{LocalStore, StoreError};

pub const CLIENT_LOG_STORAGE_KEY: &str = "tgstyle_app_logs";
pub const MAX_STORED_CLIENT_LOGS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientLogEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

fn default_level() -> String {
    "info".to_string()
}

impl ClientLogEntry {
    pub fn new(level: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: crate::events::now_utc_iso(),
            level: level.to_string(),
            message: message.into(),
            caller: None,
            data: None,
        }
    }

    fn render_line(&self) -> String {
        let caller = self.caller.as_deref().unwrap_or("unknown");
        let mut line = format!(
            "[{}] [{}] {} ({caller})",
            self.timestamp, self.level, self.message
        );
        match &self.data {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => line.push_str(&format!(" \n  Data: {text}")),
            Some(other) => line.push_str(&format!(" \n  Data: {other}")),
        }
        line
    }
}

/// Capped list of client log entries under one [`LocalStore`] key.
#[derive(Debug, Clone)]
pub struct ClientLogBook {
    store: LocalStore,
    capacity: usize,
}

impl ClientLogBook {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            capacity: MAX_STORED_CLIENT_LOGS,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn entries(&self) -> Vec<ClientLogEntry> {
        self.store
            .get(CLIENT_LOG_STORAGE_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<ClientLogEntry>>(&raw).ok())
            .unwrap_or_default()
    }

    /// Appends an entry, dropping the oldest ones beyond capacity.
    pub fn append(&self, entry: ClientLogEntry) -> Result<usize, StoreError> {
        let mut entries = self.entries();
        entries.push(entry);
        if entries.len() > self.capacity {
            let overflow = entries.len() - self.capacity;
            entries.drain(..overflow);
        }
        self.store
            .set(CLIENT_LOG_STORAGE_KEY, serde_json::to_string(&entries)?)?;
        Ok(entries.len())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(CLIENT_LOG_STORAGE_KEY)
    }
}

/// Body of a client log upload. `logs` stays untyped so a malformed upload is
/// still recorded rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientLogReport {
    #[serde(default)]
    pub logs: Value,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ClientLogReport {
    pub fn entry_count(&self) -> usize {
        self.logs.as_array().map(Vec::len).unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let body = match &self.logs {
            Value::Array(rows) => rows
                .iter()
                .map(|row| {
                    serde_json::from_value::<ClientLogEntry>(row.clone())
                        .map(|entry| entry.render_line())
                        .unwrap_or_else(|_| format!("[?] [?] {row}"))
                })
                .collect::<Vec<String>>()
                .join("\n"),
            _ => "Invalid log format".to_string(),
        };
        format!(
            "\n=== LOG START ===\nTime: {}\nUser Agent: {}\nApp version: {}\n--- Entries ---\n{body}\n=== LOG END ===\n\n",
            self.timestamp.as_deref().unwrap_or("unknown"),
            self.user_agent.as_deref().unwrap_or("unknown"),
            self.app_version.as_deref().unwrap_or("unknown"),
        )
    }

    /// Appends the rendered report to `client_logs_<date>.txt` under `dir`.
    pub fn append_to_dir(&self, dir: &Path, date: NaiveDate) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("client_logs_{}.txt", date.format("%Y-%m-%d")));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(self.render().as_bytes())?;
        Ok(path)
    }
}
