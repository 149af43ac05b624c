//! Feed poller: turns fresh mentions into queue records.
//!
//! Each round fetches mentions newer than the account's checkpoint,
//! normalizes them, and pushes one record per mention onto the queue.
//! The checkpoint advances after each successful emit, never past a
//! failure, so a crash mid-batch re-fetches the unemitted tail instead
//! of dropping it. Re-emitting an already queued mention is the
//! tolerated side of that trade.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use questproto::{classify, GameRequest};

use crate::checkpoint::CheckpointStore;
use crate::feed::{FeedError, Mention, StatusFeed};

/// How long to wait after the provider rate-limits a fetch.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(10);
/// Fetch attempts per round before giving up until the next round.
const FETCH_ATTEMPTS: u32 = 3;
/// Upper bound on any single feed call; nothing here may block a round
/// forever.
const FEED_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Normalizes one mention into a queue record: tags are lowercased and
/// deduplicated, then classified.
fn to_request(mention: &Mention, user_name: &str) -> GameRequest {
    let mut hashtags: Vec<String> = Vec::new();
    for tag in &mention.hashtags {
        let tag = tag.to_ascii_lowercase();
        if !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }
    GameRequest {
        request_type: classify(&hashtags),
        user_name: user_name.to_string(),
        status_id: mention.status_id,
        in_reply_to_status_id: mention.in_reply_to_status_id,
        hashtags,
        status_message: mention.text.clone(),
    }
}

async fn fetch_with_backoff(
    feed: &dyn StatusFeed,
    since_id: Option<u64>,
) -> Result<Vec<Mention>, FeedError> {
    let mut attempt = 1;
    loop {
        match tokio::time::timeout(FEED_CALL_TIMEOUT, feed.fetch_mentions(since_id)).await {
            Ok(Ok(mentions)) => return Ok(mentions),
            Ok(Err(FeedError::RateLimited)) if attempt < FETCH_ATTEMPTS => {
                warn!(attempt, "mention fetch rate limited, backing off");
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                attempt += 1;
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(FeedError::Unavailable("fetch timed out".to_string())),
        }
    }
}

/// One poll round. Returns how many records reached the queue.
pub async fn poll_once(
    feed: &dyn StatusFeed,
    checkpoints: &dyn CheckpointStore,
    queue: &mpsc::Sender<String>,
    account: &str,
) -> anyhow::Result<usize> {
    let since_id = checkpoints.last_seen(account)?;
    let mentions = match fetch_with_backoff(feed, since_id).await {
        Ok(mentions) => mentions,
        Err(err) => {
            warn!(error = %err, "abandoning poll round");
            return Ok(0);
        }
    };

    let mut emitted = 0;
    for mention in &mentions {
        let lookup = tokio::time::timeout(FEED_CALL_TIMEOUT, feed.lookup_user(mention.author_id));
        let user_name = match lookup.await {
            Ok(Ok(user_name)) => user_name,
            Ok(Err(err)) => {
                warn!(
                    status_id = mention.status_id,
                    error = %err,
                    "user lookup failed, stopping round"
                );
                break;
            }
            Err(_) => {
                warn!(status_id = mention.status_id, "user lookup timed out, stopping round");
                break;
            }
        };
        let request = to_request(mention, &user_name);
        debug!(
            status_id = request.status_id,
            request_type = %request.request_type,
            user = %request.user_name,
            "queueing request"
        );
        let line = request.to_json_line()?;
        if queue.send(line).await.is_err() {
            warn!("request queue closed, stopping round");
            break;
        }
        checkpoints.advance(account, mention.status_id)?;
        emitted += 1;
    }
    if emitted > 0 {
        info!(count = emitted, "emitted queue records");
    }
    Ok(emitted)
}

/// Poller loop: one round every `interval`, until shutdown is signalled
/// or the optional run budget expires. Dropping the queue sender on the
/// way out lets the engine drain and stop on its own.
pub async fn run_poller(
    feed: Arc<dyn StatusFeed>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: mpsc::Sender<String>,
    account: String,
    interval: Duration,
    deadline: Option<tokio::time::Instant>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                info!("run budget exhausted, poller stopping");
                break;
            }
        }
        if let Err(err) = poll_once(feed.as_ref(), checkpoints.as_ref(), &queue, &account).await {
            warn!(error = %err, "poll round failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("poller stopped");
}
