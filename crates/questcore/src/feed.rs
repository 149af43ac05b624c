//! Status feed boundary: fetching mentions of the bot and posting
//! replies.
//!
//! [`FileFeed`] is the spool-backed implementation used for local runs
//! and the smoke harness: mentions are read from `inbox.jsonl` and
//! outbound posts appended to `outbox.jsonl`, one JSON object per line.
//! Both files share one status id sequence so the ids interleave the way
//! a real timeline's would.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use questproto::extract_hashtags;

/// Hard cap the platform puts on a single post, in characters.
pub const MAX_POST_CHARS: usize = 140;
/// Length of the random suffix appended to every outbound post.
pub const SUFFIX_LEN: usize = 4;

const SUFFIX_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Appends a space plus `SUFFIX_LEN` random characters so repeated
/// identical texts do not trip the platform's duplicate-status filter.
pub fn with_post_suffix(text: &str) -> String {
    let mut raw = [0u8; SUFFIX_LEN];
    getrandom::getrandom(&mut raw).ok();
    let suffix: String = raw
        .iter()
        .map(|b| SUFFIX_ALPHABET[*b as usize % SUFFIX_ALPHABET.len()] as char)
        .collect();
    format!("{text} {suffix}")
}

/// One inbound mention of the bot's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub status_id: u64,
    pub author_id: u64,
    pub text: String,
    pub in_reply_to_status_id: Option<u64>,
    pub hashtags: Vec<String>,
}

/// Failure reading from the feed.
#[derive(Debug)]
pub enum FeedError {
    /// The provider asked us to slow down; the call may be retried.
    RateLimited,
    /// Anything else: transport trouble or bad provider data.
    Unavailable(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::RateLimited => write!(f, "feed rate limited"),
            FeedError::Unavailable(msg) => write!(f, "feed unavailable: {msg}"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Failure posting to the feed.
#[derive(Debug)]
pub enum PostError {
    /// Text exceeded [`MAX_POST_CHARS`]: a composition bug in the
    /// caller, not a transport problem.
    TooLong { chars: usize },
    /// The post did not go out; no status id was assigned.
    Transport(String),
}

impl fmt::Display for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::TooLong { chars } => {
                write!(f, "post is {chars} chars, limit is {MAX_POST_CHARS}")
            }
            PostError::Transport(msg) => write!(f, "post failed: {msg}"),
        }
    }
}

impl std::error::Error for PostError {}

/// Transport to the status platform.
///
/// Implementations enforce the post length limit and report rate
/// limiting distinctly so the poller can back off instead of giving up.
#[async_trait]
pub trait StatusFeed: Send + Sync {
    /// Mentions of the bot strictly newer than `since_id`, oldest first.
    async fn fetch_mentions(&self, since_id: Option<u64>) -> Result<Vec<Mention>, FeedError>;

    /// Posts `text`, optionally as a reply. Returns the new status id.
    async fn post_reply(
        &self,
        text: &str,
        in_reply_to_status_id: Option<u64>,
    ) -> Result<u64, PostError>;

    /// Resolves an author id to their handle.
    async fn lookup_user(&self, user_id: u64) -> Result<String, FeedError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InboundRecord {
    status_id: u64,
    author_id: u64,
    author_handle: String,
    text: String,
    #[serde(default)]
    in_reply_to_status_id: Option<u64>,
}

/// One outbound post as written to `outbox.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundPost {
    pub status_id: u64,
    pub text: String,
    #[serde(default)]
    pub in_reply_to_status_id: Option<u64>,
}

/// File-backed [`StatusFeed`].
pub struct FileFeed {
    inbox: PathBuf,
    outbox: PathBuf,
    next_status_id: Mutex<u64>,
}

impl FileFeed {
    /// Opens (or creates) the spool directory and seeds the status id
    /// sequence past everything already on disk.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<FileFeed> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let feed = FileFeed {
            inbox: dir.join("inbox.jsonl"),
            outbox: dir.join("outbox.jsonl"),
            next_status_id: Mutex::new(1),
        };
        let mut max_id = 0;
        for record in feed.read_inbox()? {
            max_id = max_id.max(record.status_id);
        }
        for post in feed.read_outbox()? {
            max_id = max_id.max(post.status_id);
        }
        *feed.next_status_id.lock().expect("feed lock poisoned") = max_id + 1;
        Ok(feed)
    }

    /// Writes a mention into the inbox, allocating its status id from
    /// the shared sequence. This is how tests and the smoke harness
    /// play the part of the platform's other users.
    pub fn append_inbound(
        &self,
        author_id: u64,
        author_handle: &str,
        text: &str,
        in_reply_to_status_id: Option<u64>,
    ) -> Result<u64, FeedError> {
        let status_id = self.allocate_status_id();
        let record = InboundRecord {
            status_id,
            author_id,
            author_handle: author_handle.to_string(),
            text: text.to_string(),
            in_reply_to_status_id,
        };
        append_line(&self.inbox, &record).map_err(|e| FeedError::Unavailable(e.to_string()))?;
        Ok(status_id)
    }

    /// Everything the bot has posted, oldest first.
    pub fn read_outbox(&self) -> Result<Vec<OutboundPost>, FeedError> {
        let mut posts: Vec<OutboundPost> = read_records(&self.outbox)
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;
        posts.sort_by_key(|p| p.status_id);
        Ok(posts)
    }

    fn read_inbox(&self) -> Result<Vec<InboundRecord>, anyhow::Error> {
        read_records(&self.inbox)
    }

    fn allocate_status_id(&self) -> u64 {
        let mut next = self.next_status_id.lock().expect("feed lock poisoned");
        let id = *next;
        *next += 1;
        id
    }
}

fn append_line<T: Serialize>(path: &PathBuf, record: &T) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Reads a whole JSONL file, skipping lines that do not parse. A missing
/// file is an empty one.
fn read_records<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<Vec<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %path.display(), line = line_no + 1, error = %err, "skipping bad spool line");
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl StatusFeed for FileFeed {
    async fn fetch_mentions(&self, since_id: Option<u64>) -> Result<Vec<Mention>, FeedError> {
        let floor = since_id.unwrap_or(0);
        let mut records = self
            .read_inbox()
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;
        records.retain(|r| r.status_id > floor);
        records.sort_by_key(|r| r.status_id);
        Ok(records
            .into_iter()
            .map(|r| Mention {
                status_id: r.status_id,
                author_id: r.author_id,
                hashtags: extract_hashtags(&r.text),
                text: r.text,
                in_reply_to_status_id: r.in_reply_to_status_id,
            })
            .collect())
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
        let post = OutboundPost {
            status_id: self.allocate_status_id(),
            text: text.to_string(),
            in_reply_to_status_id,
        };
        append_line(&self.outbox, &post).map_err(|e| PostError::Transport(e.to_string()))?;
        Ok(post.status_id)
    }

    async fn lookup_user(&self, user_id: u64) -> Result<String, FeedError> {
        let records = self
            .read_inbox()
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;
        records
            .iter()
            .find(|r| r.author_id == user_id)
            .map(|r| r.author_handle.clone())
            .ok_or_else(|| FeedError::Unavailable(format!("unknown user {user_id}")))
    }
}
