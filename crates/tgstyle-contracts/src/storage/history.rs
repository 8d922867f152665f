use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classification::ClassificationResult;

use super::local::{LocalStore, StoreError};

pub const HISTORY_CAPACITY: usize = 4;
pub const HISTORY_STORAGE_KEY: &str = "tgstyle_history";
/// Serialized history above this size is saved with degraded photos.
pub const HISTORY_STORAGE_BUDGET: usize = 4 * 1024 * 1024;
pub const DEGRADED_PHOTO_PREFIX_CHARS: usize = 10_000;
pub const TRUNCATION_MARKER: &str = "...";

pub type HistorySlots = [Option<AnalysisRecord>; HISTORY_CAPACITY];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GeneratedText {
    pub analysis: String,
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    /// Base64 JPEG payload; may end in [`TRUNCATION_MARKER`] once degraded.
    pub photo: Option<String>,
    pub classification: ClassificationResult,
    #[serde(default)]
    pub generated_text: GeneratedText,
    pub timestamp: String,
}

impl AnalysisRecord {
    pub fn photo_is_truncated(&self) -> bool {
        self.photo
            .as_deref()
            .map(|photo| photo.ends_with(TRUNCATION_MARKER))
            .unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    pub index: usize,
    pub evicted: Option<AnalysisRecord>,
    pub save: SaveReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub bytes: usize,
    pub degraded: bool,
    pub persisted: bool,
}

/// Fixed-capacity history of past analyses kept in a [`LocalStore`] key.
///
/// Insert fills the first empty slot; with no hole left it prepends and drops
/// the record at the last index. Deleting leaves a hole in place, so slot
/// positions stay stable for the grid the client renders.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    store: LocalStore,
    key: String,
    budget: usize,
}

impl HistoryStore {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            key: HISTORY_STORAGE_KEY.to_string(),
            budget: HISTORY_STORAGE_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn load(&self) -> HistorySlots {
        let mut slots = empty_slots();
        let Some(raw) = self.store.get(&self.key) else {
            return slots;
        };
        let Ok(Value::Array(rows)) = serde_json::from_str::<Value>(&raw) else {
            return slots;
        };
        for (slot, row) in slots.iter_mut().zip(rows) {
            *slot = parse_slot(row);
        }
        slots
    }

    pub fn insert(&self, record: AnalysisRecord) -> Result<InsertOutcome, HistoryError> {
        let mut slots = self.load();
        let (index, evicted) = match slots.iter().position(Option::is_none) {
            Some(index) => {
                slots[index] = Some(record);
                (index, None)
            }
            None => {
                let evicted = slots[HISTORY_CAPACITY - 1].take();
                slots.rotate_right(1);
                slots[0] = Some(record);
                (0, evicted)
            }
        };
        let save = self.save(&slots)?;
        Ok(InsertOutcome {
            index,
            evicted,
            save,
        })
    }

    pub fn delete_at(&self, index: usize) -> Result<Option<AnalysisRecord>, HistoryError> {
        if index >= HISTORY_CAPACITY {
            return Err(HistoryError::IndexOutOfRange {
                index,
                capacity: HISTORY_CAPACITY,
            });
        }
        let mut slots = self.load();
        let removed = slots[index].take();
        self.save(&slots)?;
        Ok(removed)
    }

    fn save(&self, slots: &HistorySlots) -> Result<SaveReport, HistoryError> {
        let encoded = serde_json::to_string(slots).map_err(StoreError::from)?;
        if encoded.len() <= self.budget {
            match self.store.set(&self.key, encoded.clone()) {
                Ok(()) => {
                    return Ok(SaveReport {
                        bytes: encoded.len(),
                        degraded: false,
                        persisted: true,
                    })
                }
                Err(StoreError::QuotaExceeded { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let degraded = degrade_photos(slots);
        let encoded = serde_json::to_string(&degraded).map_err(StoreError::from)?;
        let persisted = match self.store.set(&self.key, encoded.clone()) {
            Ok(()) => true,
            Err(StoreError::QuotaExceeded { .. }) => false,
            Err(err) => return Err(err.into()),
        };
        Ok(SaveReport {
            bytes: encoded.len(),
            degraded: true,
            persisted,
        })
    }
}

pub fn empty_slots() -> HistorySlots {
    std::array::from_fn(|_| None)
}

fn parse_slot(row: Value) -> Option<AnalysisRecord> {
    if row.is_null() {
        return None;
    }
    if row.get("isEmpty").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    serde_json::from_value(row).ok()
}

fn degrade_photos(slots: &HistorySlots) -> HistorySlots {
    let mut degraded = slots.clone();
    for record in degraded.iter_mut().flatten() {
        record.photo = record.photo.as_deref().map(|photo| {
            let prefix: String = photo.chars().take(DEGRADED_PHOTO_PREFIX_CHARS).collect();
            prefix + TRUNCATION_MARKER
        });
    }
    degraded
}
