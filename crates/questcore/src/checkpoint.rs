//! Poller checkpoints: the newest mention id already turned into a
//! queue record, tracked per account.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::store::StoreError;

pub trait CheckpointStore: Send + Sync {
    fn last_seen(&self, account: &str) -> Result<Option<u64>, StoreError>;

    /// Moves the checkpoint forward. Calls that would move it backward
    /// are ignored.
    fn advance(&self, account: &str, post_id: u64) -> Result<(), StoreError>;
}

/// Checkpoints in a single JSON object file, account handle to post id.
pub struct JsonCheckpoints {
    path: PathBuf,
    inner: Mutex<HashMap<String, u64>>,
}

impl JsonCheckpoints {
    pub fn open(path: impl Into<PathBuf>) -> Result<JsonCheckpoints, StoreError> {
        let path = path.into();
        let map = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(JsonCheckpoints {
            path,
            inner: Mutex::new(map),
        })
    }

    fn save(&self, map: &HashMap<String, u64>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for JsonCheckpoints {
    fn last_seen(&self, account: &str) -> Result<Option<u64>, StoreError> {
        let map = self.inner.lock().expect("checkpoint lock poisoned");
        Ok(map.get(account).copied())
    }

    fn advance(&self, account: &str, post_id: u64) -> Result<(), StoreError> {
        let mut map = self.inner.lock().expect("checkpoint lock poisoned");
        let current = map.get(account).copied().unwrap_or(0);
        if post_id <= current {
            return Ok(());
        }
        map.insert(account.to_string(), post_id);
        if let Err(err) = self.save(&map) {
            if current == 0 {
                map.remove(account);
            } else {
                map.insert(account.to_string(), current);
            }
            return Err(err);
        }
        Ok(())
    }
}
