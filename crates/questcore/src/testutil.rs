//! Test doubles shared across the crate's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::feed::{FeedError, Mention, PostError, StatusFeed, MAX_POST_CHARS};

/// One outbound post captured by [`ScriptFeed`].
#[derive(Debug, Clone)]
pub struct SentPost {
    pub status_id: u64,
    pub text: String,
    pub in_reply_to_status_id: Option<u64>,
}

/// Scripted in-memory feed: tests preload mentions and users, then
/// inspect what the code under test posted.
pub struct ScriptFeed {
    mentions: Mutex<Vec<Mention>>,
    users: Mutex<HashMap<u64, String>>,
    sent: Mutex<Vec<SentPost>>,
    next_status_id: AtomicU64,
    fail_posts: AtomicUsize,
    rate_limit_fetches: AtomicUsize,
}

impl ScriptFeed {
    pub fn new() -> ScriptFeed {
        ScriptFeed {
            mentions: Mutex::new(Vec::new()),
            users: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            next_status_id: AtomicU64::new(1000),
            fail_posts: AtomicUsize::new(0),
            rate_limit_fetches: AtomicUsize::new(0),
        }
    }

    pub fn add_user(&self, user_id: u64, handle: &str) {
        self.users
            .lock()
            .unwrap()
            .insert(user_id, handle.to_string());
    }

    pub fn add_mention(&self, mention: Mention) {
        self.mentions.lock().unwrap().push(mention);
    }

    pub fn sent(&self) -> Vec<SentPost> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_sent(&self) -> SentPost {
        self.sent
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("nothing was posted")
    }

    /// Makes the next `n` posts fail with a transport error.
    pub fn fail_next_posts(&self, n: usize) {
        self.fail_posts.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` fetches fail with a rate limit.
    pub fn rate_limit_next_fetches(&self, n: usize) {
        self.rate_limit_fetches.store(n, Ordering::SeqCst);
    }
}

/// Consumes one unit of a failure budget; true while any remains.
fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl StatusFeed for ScriptFeed {
    async fn fetch_mentions(&self, since_id: Option<u64>) -> Result<Vec<Mention>, FeedError> {
        if take(&self.rate_limit_fetches) {
            return Err(FeedError::RateLimited);
        }
        let floor = since_id.unwrap_or(0);
        let mut mentions: Vec<Mention> = self
            .mentions
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.status_id > floor)
            .cloned()
            .collect();
        mentions.sort_by_key(|m| m.status_id);
        Ok(mentions)
    }

    async fn post_reply(
        &self,
        text: &str,
        in_reply_to_status_id: Option<u64>,
    ) -> Result<u64, PostError> {
        let chars = text.chars().count();
        if chars > MAX_POST_CHARS {
            return Err(PostError::TooLong { chars });
        }
        if take(&self.fail_posts) {
            return Err(PostError::Transport("scripted failure".to_string()));
        }
        let status_id = self.next_status_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(SentPost {
            status_id,
            text: text.to_string(),
            in_reply_to_status_id,
        });
        Ok(status_id)
    }

    async fn lookup_user(&self, user_id: u64) -> Result<String, FeedError> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| FeedError::Unavailable(format!("unknown user {user_id}")))
    }
}
