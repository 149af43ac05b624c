//! Session persistence.
//!
//! The store is keyed by `TweetStartId` and queried two more ways: by
//! creator (to stop a user from running two games at once) and by the
//! current story post (to resolve selections). Every write carries the
//! version the writer read, so two engine instances racing on one
//! session cannot silently overwrite each other.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use questproto::GameSession;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt(serde_json::Error),
    /// A conditional write lost: someone else updated the record first.
    VersionConflict {
        tweet_start_id: u64,
        expected: u64,
        found: u64,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "session store io: {err}"),
            StoreError::Corrupt(err) => write!(f, "session store corrupt: {err}"),
            StoreError::VersionConflict {
                tweet_start_id,
                expected,
                found,
            } => write!(
                f,
                "version conflict on session {tweet_start_id}: expected {expected}, found {found}"
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            StoreError::Corrupt(err) => Some(err),
            StoreError::VersionConflict { .. } => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> StoreError {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> StoreError {
        StoreError::Corrupt(err)
    }
}

pub trait SessionStore: Send + Sync {
    fn get(&self, tweet_start_id: u64) -> Result<Option<GameSession>, StoreError>;

    /// All sessions created by `user_name`, any state, oldest first.
    fn find_by_creator(&self, user_name: &str) -> Result<Vec<GameSession>, StoreError>;

    /// The session whose latest story post is `current_tweet_id`.
    fn find_by_current_tweet(&self, current_tweet_id: u64)
        -> Result<Option<GameSession>, StoreError>;

    /// Conditional write. Succeeds only while the stored version still
    /// equals `expected_version` (`0` for a record that must not exist
    /// yet) and returns the new version.
    fn upsert(&self, session: &GameSession, expected_version: u64) -> Result<u64, StoreError>;
}

/// Single-file JSON store: the whole table lives in memory and is
/// rewritten through a temp file on every change.
pub struct JsonStore {
    path: PathBuf,
    inner: Mutex<HashMap<u64, GameSession>>,
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<JsonStore, StoreError> {
        let path = path.into();
        let mut map = HashMap::new();
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let sessions: Vec<GameSession> = serde_json::from_str(&raw)?;
                for session in sessions {
                    map.insert(session.tweet_start_id, session);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(JsonStore {
            path,
            inner: Mutex::new(map),
        })
    }

    fn save(&self, map: &HashMap<u64, GameSession>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut sessions: Vec<&GameSession> = map.values().collect();
        sessions.sort_by_key(|s| s.tweet_start_id);
        let raw = serde_json::to_string_pretty(&sessions)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for JsonStore {
    fn get(&self, tweet_start_id: u64) -> Result<Option<GameSession>, StoreError> {
        let map = self.inner.lock().expect("store lock poisoned");
        Ok(map.get(&tweet_start_id).cloned())
    }

    fn find_by_creator(&self, user_name: &str) -> Result<Vec<GameSession>, StoreError> {
        let map = self.inner.lock().expect("store lock poisoned");
        let mut found: Vec<GameSession> = map
            .values()
            .filter(|s| s.game_creator == user_name)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.tweet_start_id);
        Ok(found)
    }

    fn find_by_current_tweet(
        &self,
        current_tweet_id: u64,
    ) -> Result<Option<GameSession>, StoreError> {
        let map = self.inner.lock().expect("store lock poisoned");
        let mut hits: Vec<&GameSession> = map
            .values()
            .filter(|s| s.current_tweet_id == Some(current_tweet_id))
            .collect();
        hits.sort_by_key(|s| s.tweet_start_id);
        if hits.len() > 1 {
            warn!(
                current_tweet_id,
                matches = hits.len(),
                "multiple sessions claim one story post"
            );
        }
        Ok(hits.first().map(|s| (*s).clone()))
    }

    fn upsert(&self, session: &GameSession, expected_version: u64) -> Result<u64, StoreError> {
        let mut map = self.inner.lock().expect("store lock poisoned");
        let found = map
            .get(&session.tweet_start_id)
            .map(|s| s.version)
            .unwrap_or(0);
        if found != expected_version {
            return Err(StoreError::VersionConflict {
                tweet_start_id: session.tweet_start_id,
                expected: expected_version,
                found,
            });
        }
        let mut stored = session.clone();
        stored.version = expected_version + 1;
        let previous = map.insert(stored.tweet_start_id, stored);
        if let Err(err) = self.save(&map) {
            // Roll the memory image back so it keeps matching the disk.
            match previous {
                Some(prev) => {
                    map.insert(prev.tweet_start_id, prev);
                }
                None => {
                    map.remove(&session.tweet_start_id);
                }
            }
            return Err(err);
        }
        Ok(expected_version + 1)
    }
}
