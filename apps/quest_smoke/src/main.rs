//! quest_smoke: scripted end-to-end pass over the quest pipeline.
//!
//! Plays one full game against a throwaway file spool: alice creates a
//! quest, bob joins, alice starts it, and two selections walk it to an
//! ending. Prints the outbound transcript and fails unless the session
//! finishes complete.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, Level};

use questcore::checkpoint::JsonCheckpoints;
use questcore::engine::Engine;
use questcore::feed::{FileFeed, OutboundPost, StatusFeed};
use questcore::poller;
use questcore::store::{JsonStore, SessionStore};

#[derive(Clone, Debug)]
struct Config {
    spool_dir: PathBuf,
    account: String,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "quest_smoke\n\n\
USAGE:\n  quest_smoke [--spool-dir DIR]\n\n\
ENV:\n  QUESTBOT_ACCOUNT   default @questbot\n  SMOKE_SPOOL_DIR    default locks/quest_smoke (wiped on every run)\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Config {
    let account = std::env::var("QUESTBOT_ACCOUNT").unwrap_or_else(|_| "@questbot".to_string());
    let mut spool_dir: PathBuf = std::env::var("SMOKE_SPOOL_DIR")
        .unwrap_or_else(|_| "locks/quest_smoke".to_string())
        .into();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--spool-dir" => spool_dir = it.next().unwrap_or_else(|| usage_and_exit()).into(),
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config { spool_dir, account }
}

struct Party {
    feed: Arc<FileFeed>,
    checkpoints: JsonCheckpoints,
    engine: Engine,
    account: String,
}

impl Party {
    /// Polls once and hands everything that surfaced to the engine.
    async fn pump(&self) -> anyhow::Result<usize> {
        let (tx, mut rx) = mpsc::channel(64);
        poller::poll_once(self.feed.as_ref(), &self.checkpoints, &tx, &self.account).await?;
        drop(tx);
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        let handled = self.engine.handle_batch(&lines).await;
        anyhow::ensure!(
            handled == lines.len(),
            "{} of {} records failed",
            lines.len() - handled,
            lines.len()
        );
        Ok(handled)
    }

    fn last_post(&self) -> anyhow::Result<OutboundPost> {
        self.feed
            .read_outbox()?
            .pop()
            .context("the bot has not posted anything yet")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quest_smoke=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    if cfg.spool_dir.exists() {
        std::fs::remove_dir_all(&cfg.spool_dir)
            .with_context(|| format!("wiping {}", cfg.spool_dir.display()))?;
    }
    info!(spool = %cfg.spool_dir.display(), "quest smoke starting");

    let feed = Arc::new(FileFeed::open(cfg.spool_dir.join("feed"))?);
    let store: Arc<dyn SessionStore> =
        Arc::new(JsonStore::open(cfg.spool_dir.join("sessions.json"))?);
    let dyn_feed: Arc<dyn StatusFeed> = feed.clone();
    let party = Party {
        feed: feed.clone(),
        checkpoints: JsonCheckpoints::open(cfg.spool_dir.join("checkpoint.json"))?,
        engine: Engine::new(dyn_feed, store.clone()),
        account: cfg.account.clone(),
    };

    info!("alice asks for a new quest");
    feed.append_inbound(10, "alice", "hey @questbot #LetsPlay", None)?;
    party.pump().await?;
    let invitation = party.last_post()?;

    info!("bob joins in");
    feed.append_inbound(11, "bob", "@questbot #JoinGame", Some(invitation.status_id))?;
    party.pump().await?;

    info!("alice starts the game");
    feed.append_inbound(10, "alice", "@questbot #StartGame", Some(invitation.status_id))?;
    party.pump().await?;
    let step = party.last_post()?;

    info!("alice heads for the tree");
    feed.append_inbound(10, "alice", "@questbot #ChooseMe #Tree", Some(step.status_id))?;
    party.pump().await?;
    let step = party.last_post()?;

    info!("bob listens closely");
    feed.append_inbound(11, "bob", "@questbot #ChooseMe #Listen", Some(step.status_id))?;
    party.pump().await?;

    println!("--- outbound transcript ---");
    for post in feed.read_outbox()? {
        match post.in_reply_to_status_id {
            Some(parent) => println!("[{} -> {}] {}", post.status_id, parent, post.text),
            None => println!("[{}] {}", post.status_id, post.text),
        }
    }

    let session = store
        .find_by_creator("alice")?
        .pop()
        .context("no session for alice")?;
    anyhow::ensure!(
        session.is_complete(),
        "expected a finished game, found {}",
        session.game_state
    );
    anyhow::ensure!(
        session.players == vec!["alice".to_string(), "bob".to_string()],
        "unexpected roster {:?}",
        session.players
    );
    info!(
        tweet_start_id = session.tweet_start_id,
        posts = session.twitter_steps.len(),
        "quest completed"
    );
    Ok(())
}
