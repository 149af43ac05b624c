//! Game state engine: routes queue records to their handlers and posts
//! the replies players see.
//!
//! Every handler follows the same discipline: read, decide, post, and
//! only then persist. A story post that never made it out must leave the
//! session exactly as it was, otherwise players end up replying to a
//! post that does not exist.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use questproto::request::{TAG_CREATE, TAG_JOIN, TAG_SELECT, TAG_START};
use questproto::{GameRequest, GameSession, GameState, RequestType};

use crate::feed::{with_post_suffix, PostError, StatusFeed};
use crate::graph::{self, Choice};
use crate::store::{SessionStore, StoreError};

/// Sleep after this many processed records so a burst of mentions does
/// not hammer the posting API.
const THROTTLE_EVERY: usize = 10;
const THROTTLE_SLEEP: Duration = Duration::from_secs(10);

/// Upper bound on a single outbound post. A stuck transport must not
/// wedge the whole queue behind one reply.
const POST_TIMEOUT: Duration = Duration::from_secs(30);

const GENERAL_HELP: &str = "Help: Create a quest with #LetsPlay. Start with #StartGame. \
     Join with #JoinGame. Choose with #ChooseMe and your #selection.";

const COMMAND_HELP: &[(&str, &str)] = &[
    (
        TAG_CREATE,
        "Help: #LetsPlay creates a new quest and posts an invitation for others to join.",
    ),
    (
        TAG_START,
        "Help: reply #StartGame to your invitation post to begin the story. Creators only!",
    ),
    (
        TAG_JOIN,
        "Help: reply #JoinGame to an invitation post to join that quest. Four players max.",
    ),
    (
        TAG_SELECT,
        "Help: reply to the latest story post with #ChooseMe and exactly one option tag.",
    ),
];

pub struct Engine {
    feed: Arc<dyn StatusFeed>,
    store: Arc<dyn SessionStore>,
}

impl Engine {
    pub fn new(feed: Arc<dyn StatusFeed>, store: Arc<dyn SessionStore>) -> Engine {
        Engine { feed, store }
    }

    /// Handles a batch of raw queue lines in order. A record that fails
    /// to decode or to handle is logged and skipped; it never stops the
    /// batch. Returns how many records were handled cleanly.
    pub async fn handle_batch(&self, lines: &[String]) -> usize {
        info!(count = lines.len(), "processing queue records");
        let mut handled = 0;
        for line in lines {
            let request = match GameRequest::from_json_line(line) {
                Ok(request) => request,
                Err(err) => {
                    error!(error = %err, "dropping undecodable queue record");
                    continue;
                }
            };
            debug!(
                request_type = %request.request_type,
                user = %request.user_name,
                status_id = request.status_id,
                "routing request"
            );
            match self.route(&request).await {
                Ok(()) => handled += 1,
                Err(err) => {
                    error!(error = %err, status_id = request.status_id, "request handling failed");
                }
            }
        }
        handled
    }

    /// Dispatches one decoded request to its handler.
    pub async fn route(&self, request: &GameRequest) -> anyhow::Result<()> {
        match request.request_type {
            RequestType::Help => self.send_help(request).await,
            RequestType::CreateGame => self.create_game(request).await,
            RequestType::StartGame => self.start_game(request).await,
            RequestType::JoinGame => self.join_game(request).await,
            RequestType::MakeSelection => self.make_selection(request).await,
            RequestType::Unknown => self.send_unknown(request).await,
        }
    }

    async fn send_help(&self, request: &GameRequest) -> anyhow::Result<()> {
        self.send_reply(help_text(&request.hashtags), request.in_reply_to_status_id)
            .await;
        Ok(())
    }

    async fn send_unknown(&self, request: &GameRequest) -> anyhow::Result<()> {
        let text = format!(
            "Hello @{}! I could not understand your request.",
            request.user_name
        );
        self.send_reply(&text, Some(request.status_id)).await;
        Ok(())
    }

    async fn create_game(&self, request: &GameRequest) -> anyhow::Result<()> {
        let user = &request.user_name;
        let existing = self.store.find_by_creator(user)?;
        if existing.iter().any(|s| !s.is_complete()) {
            let text = format!("Hello @{user}! You already have a game started!");
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        }

        let text = format!(
            "Welcome to the quest @{user}! To start reply with #StartGame. \
             To join this game, reply to this with #JoinGame"
        );
        let Some(invite_id) = self.send_reply(&text, Some(request.status_id)).await else {
            return Ok(());
        };

        let session = GameSession::new(invite_id, user, request.status_id, now_unix());
        let version = self.store.upsert(&session, 0)?;
        info!(tweet_start_id = invite_id, creator = %user, version, "created game");
        Ok(())
    }

    async fn start_game(&self, request: &GameRequest) -> anyhow::Result<()> {
        let user = &request.user_name;
        let Some(reply_to) = request.in_reply_to_status_id else {
            let text = format!("@{user} reply to the game invitation you want to start!");
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        };
        let Some(mut session) = self.store.get(reply_to)? else {
            let text = format!("You are trying to start a game that doesn't exist @{user}!");
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        };
        if session.game_creator != *user {
            let text =
                format!("@{user} you cannot start someone else's game! Create your own with #LetsPlay");
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        }

        session.game_state = GameState::PendingGameInput;
        let choice = graph::get_choice(graph::ENTRY_STEP)?;
        let text = step_post_text(&session.players, choice);
        let Some(post_id) = self.send_reply(&text, None).await else {
            warn!(
                tweet_start_id = session.tweet_start_id,
                "story post failed, game not started"
            );
            return Ok(());
        };

        session.record_step(post_id, choice.id);
        let expected = session.version;
        match self.store.upsert(&session, expected) {
            Ok(version) => {
                info!(
                    tweet_start_id = session.tweet_start_id,
                    step = choice.id,
                    version,
                    "started game"
                );
                Ok(())
            }
            Err(StoreError::VersionConflict {
                tweet_start_id,
                expected,
                found,
            }) => {
                warn!(tweet_start_id, expected, found, "concurrent update won, dropping start");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn join_game(&self, request: &GameRequest) -> anyhow::Result<()> {
        let user = &request.user_name;
        let session = match request.in_reply_to_status_id {
            Some(reply_to) => self.store.get(reply_to)?,
            None => None,
        };
        let text = match session {
            None => format!("Hello @{user}! I can't seem to find the game to join."),
            Some(session) if session.is_full() => format!(
                "Hello @{user}. The game is full, but you can try starting your own game!"
            ),
            Some(session) if session.has_player(user) => format!(
                "@{user} you already joined this game! Wait for the creator to #StartGame."
            ),
            Some(mut session) => {
                session.players.push(user.clone());
                let expected = session.version;
                match self.store.upsert(&session, expected) {
                    Ok(version) => {
                        info!(
                            tweet_start_id = session.tweet_start_id,
                            player = %user,
                            version,
                            "player joined"
                        );
                        format!("Hello @{user}. Welcome to the game. Prepare yourself :)")
                    }
                    Err(StoreError::VersionConflict {
                        tweet_start_id,
                        expected,
                        found,
                    }) => {
                        warn!(tweet_start_id, expected, found, "concurrent update won, dropping join");
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };
        self.send_reply(&text, Some(request.status_id)).await;
        Ok(())
    }

    async fn make_selection(&self, request: &GameRequest) -> anyhow::Result<()> {
        let user = &request.user_name;
        let found = match request.in_reply_to_status_id {
            Some(reply_to) => self.store.find_by_current_tweet(reply_to)?,
            None => None,
        };
        let Some(mut session) = found else {
            let text = format!(
                "@{user} the game doesn't exist! Start your own by tweeting at me with #LetsPlay."
            );
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        };
        if session.is_complete() {
            let text = format!("@{user} this game has already ended! Start a new one with #LetsPlay.");
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        }
        if !session.has_player(user) {
            let text = "Hey you! Get out! You're not part of this game! \
                        Start your own by tweeting at me with #LetsPlay.";
            self.send_reply(text, Some(request.status_id)).await;
            return Ok(());
        }
        let Some(step) = session.current_game_step else {
            anyhow::bail!(
                "session {} has a current post but no current step",
                session.tweet_start_id
            );
        };

        let choice = graph::get_choice(step)?;
        let matched = choice.matching_options(&request.hashtags);
        if matched.len() != 1 {
            debug!(
                tweet_start_id = session.tweet_start_id,
                matches = matched.len(),
                "selection did not pick exactly one option"
            );
            let text = format!("@{user} that wasn't a valid response! Try again!");
            self.send_reply(&text, Some(request.status_id)).await;
            return Ok(());
        }

        let next = graph::get_choice(matched[0].next_id)?;
        let text = step_post_text(&session.players, next);
        let Some(post_id) = self.send_reply(&text, None).await else {
            warn!(
                tweet_start_id = session.tweet_start_id,
                "story post failed, selection dropped"
            );
            return Ok(());
        };

        session.record_step(post_id, next.id);
        if next.is_ending {
            session.game_state = GameState::GameComplete;
        }
        let expected = session.version;
        match self.store.upsert(&session, expected) {
            Ok(version) => {
                if next.is_ending {
                    info!(
                        tweet_start_id = session.tweet_start_id,
                        step = next.id,
                        version,
                        "game complete"
                    );
                } else {
                    info!(
                        tweet_start_id = session.tweet_start_id,
                        step = next.id,
                        version,
                        "advanced story"
                    );
                }
                Ok(())
            }
            Err(StoreError::VersionConflict {
                tweet_start_id,
                expected,
                found,
            }) => {
                warn!(tweet_start_id, expected, found, "concurrent update won, dropping selection");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Posts one reply with the anti-duplicate suffix applied. Returns
    /// the new status id, or `None` when the post did not go out.
    async fn send_reply(&self, text: &str, in_reply_to_status_id: Option<u64>) -> Option<u64> {
        let body = with_post_suffix(text);
        let post = tokio::time::timeout(
            POST_TIMEOUT,
            self.feed.post_reply(&body, in_reply_to_status_id),
        );
        let result = match post.await {
            Ok(result) => result,
            Err(_) => {
                warn!(text = %body, "post timed out");
                return None;
            }
        };
        match result {
            Ok(status_id) => {
                debug!(status_id, text = %body, "posted reply");
                Some(status_id)
            }
            Err(PostError::TooLong { chars }) => {
                error!(chars, text = %body, "composed reply exceeds the post limit");
                None
            }
            Err(PostError::Transport(msg)) => {
                warn!(error = %msg, "reply did not post");
                None
            }
        }
    }
}

/// Engine loop: drains the queue in small batches until the queue closes
/// or shutdown is signalled. In-flight batches finish; queued records
/// behind a shutdown are abandoned.
pub async fn run_engine(
    engine: Engine,
    mut queue: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut since_throttle = 0usize;
    loop {
        let first = tokio::select! {
            line = queue.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        let mut batch = vec![first];
        while batch.len() < THROTTLE_EVERY {
            match queue.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }
        since_throttle += batch.len();
        engine.handle_batch(&batch).await;
        if since_throttle >= THROTTLE_EVERY {
            debug!(processed = since_throttle, "throttling before the next batch");
            tokio::time::sleep(THROTTLE_SLEEP).await;
            since_throttle = 0;
        }
    }
    info!("engine stopped");
}

/// Help copy. When the asker paired #Help with exactly one command tag,
/// the reply narrows to that command.
fn help_text(hashtags: &[String]) -> &'static str {
    let matches: Vec<&'static str> = COMMAND_HELP
        .iter()
        .filter(|(tag, _)| hashtags.iter().any(|h| h.eq_ignore_ascii_case(tag)))
        .map(|(_, text)| *text)
        .collect();
    match matches.as_slice() {
        [one] => one,
        _ => GENERAL_HELP,
    }
}

/// Story post body: the player roster, the step text, then one `#Tag`
/// per option. Ending steps render without tags.
fn step_post_text(players: &[String], choice: &Choice) -> String {
    let mut text = players
        .iter()
        .map(|p| format!("@{p}"))
        .collect::<Vec<_>>()
        .join(" ");
    text.push(' ');
    text.push_str(choice.text);
    let tags = choice.option_tags();
    if !tags.is_empty() {
        text.push(' ');
        text.push_str(&tags);
    }
    text
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
