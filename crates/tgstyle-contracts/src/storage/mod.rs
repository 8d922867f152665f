pub mod client_logs;
pub mod history;
pub mod local;

pub use client_logs::{ClientLogBook, ClientLogEntry, ClientLogReport};
pub use history::{
    AnalysisRecord, GeneratedText, HistoryError, HistorySlots, HistoryStore, InsertOutcome,
    SaveReport, HISTORY_CAPACITY,
};
pub use local::{LocalStore, StoreError};
