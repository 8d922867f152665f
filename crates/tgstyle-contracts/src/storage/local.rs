use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Browser `localStorage` quota the store mimics by default.
pub const DEFAULT_LOCAL_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {required} bytes needed, quota is {quota}")]
    QuotaExceeded { required: usize, quota: usize },
    #[error("local store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("local store encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// String key/value store persisted as one JSON object on disk.
///
/// Every read goes back to the file, and writes merge into whatever is on disk
/// so that two handles on the same path do not clobber each other's keys.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    quota: Option<usize>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota: Some(DEFAULT_LOCAL_QUOTA_BYTES),
        }
    }

    pub fn with_quota(mut self, quota: Option<usize>) -> Self {
        self.quota = quota;
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        read_json_object(&self.path)
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut on_disk = read_json_object(&self.path);
        if on_disk.get(key).and_then(Value::as_str) == Some(value.as_str()) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), Value::String(value));
        if let Some(quota) = self.quota {
            let required = usage_bytes(&on_disk);
            if required > quota {
                return Err(StoreError::QuotaExceeded { required, quota });
            }
        }
        write_json_object(&self.path, &on_disk)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut on_disk = read_json_object(&self.path);
        if on_disk.remove(key).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &on_disk)
    }
}

// Counts keys and string values the way a browser quota would.
fn usage_bytes(payload: &Map<String, Value>) -> usize {
    payload
        .iter()
        .map(|(key, value)| key.len() + value.as_str().map(str::len).unwrap_or(0))
        .sum()
}

fn read_json_object(path: &Path) -> Map<String, Value> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        .and_then(|parsed| parsed.as_object().cloned())
        .unwrap_or_default()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(&Value::Object(payload.clone()))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LocalStore, StoreError};

    #[test]
    fn set_then_get_round_trips_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path().join("local.json"));
        store.set("greeting", "hello".to_string())?;
        assert_eq!(store.get("greeting").as_deref(), Some("hello"));
        assert_eq!(store.get("missing"), None);
        Ok(())
    }

    #[test]
    fn handles_on_the_same_path_merge_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("local.json");
        let store_a = LocalStore::new(&path);
        let store_b = LocalStore::new(&path);

        store_a.set("a", "1".to_string())?;
        store_b.set("b", "2".to_string())?;
        store_a.set("c", "3".to_string())?;

        let reloaded = LocalStore::new(path);
        assert_eq!(reloaded.get("a").as_deref(), Some("1"));
        assert_eq!(reloaded.get("b").as_deref(), Some("2"));
        assert_eq!(reloaded.get("c").as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn writes_over_quota_are_rejected_and_leave_disk_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path().join("local.json")).with_quota(Some(16));
        store.set("k", "small".to_string())?;

        let err = store.set("k", "x".repeat(64)).err();
        assert!(matches!(err, Some(StoreError::QuotaExceeded { quota: 16, .. })));
        assert_eq!(store.get("k").as_deref(), Some("small"));
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("local.json");
        std::fs::write(&path, "{not json")?;
        let store = LocalStore::new(&path);
        assert_eq!(store.get("anything"), None);
        store.set("fresh", "value".to_string())?;
        assert_eq!(store.get("fresh").as_deref(), Some("value"));

        store.remove("fresh")?;
        assert_eq!(store.get("fresh"), None);
        Ok(())
    }
}
