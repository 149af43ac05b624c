//! questbotd: the mention-driven quest bot daemon.
//!
//! Two tasks share an in-process queue. The poller turns fresh mentions
//! of the bot's account into request records; the engine consumes them,
//! mutates game sessions, and posts replies. Everything durable lives
//! under the spool directory: the feed files, the session table, and
//! the poller checkpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, Level};

use questcore::checkpoint::{CheckpointStore, JsonCheckpoints};
use questcore::engine::{run_engine, Engine};
use questcore::feed::{FileFeed, StatusFeed};
use questcore::graph;
use questcore::poller::run_poller;
use questcore::store::{JsonStore, SessionStore};

fn usage_and_exit() -> ! {
    eprintln!(
        "questbotd (mention-driven quest bot)\n\n\
USAGE:\n  questbotd [--account @HANDLE] [--spool-dir DIR] [--poll-interval-s SECS] [--run-s SECS]\n\n\
ENV:\n  QUESTBOT_ACCOUNT           default @questbot\n  QUESTBOT_SPOOL_DIR         default locks/questbot (feed spool, sessions, checkpoint)\n  QUESTBOT_POLL_INTERVAL_S   default 10\n  QUESTBOT_QUEUE_CAPACITY    default 256\n  QUESTBOT_RUN_S             optional; stop polling after this many seconds\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    account: String,
    spool_dir: PathBuf,
    poll_interval: Duration,
    queue_capacity: usize,
    run_budget: Option<Duration>,
}

fn parse_args() -> Config {
    let mut account =
        std::env::var("QUESTBOT_ACCOUNT").unwrap_or_else(|_| "@questbot".to_string());
    let mut spool_dir: PathBuf = std::env::var("QUESTBOT_SPOOL_DIR")
        .unwrap_or_else(|_| "locks/questbot".to_string())
        .into();
    let mut poll_interval_s: u64 = std::env::var("QUESTBOT_POLL_INTERVAL_S")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let queue_capacity: usize = std::env::var("QUESTBOT_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(256);
    let mut run_s: Option<u64> = std::env::var("QUESTBOT_RUN_S")
        .ok()
        .and_then(|v| v.parse().ok());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--account" => {
                account = it.next().unwrap_or_else(|| usage_and_exit());
            }
            "--spool-dir" => {
                spool_dir = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "--poll-interval-s" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                poll_interval_s = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--run-s" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                run_s = Some(v.parse().unwrap_or_else(|_| usage_and_exit()));
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        account,
        spool_dir,
        poll_interval: Duration::from_secs(poll_interval_s),
        queue_capacity,
        run_budget: run_s.map(Duration::from_secs),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,questbotd=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    graph::validate()?;

    info!(account = %cfg.account, spool = %cfg.spool_dir.display(), "questbotd starting");

    let feed: Arc<dyn StatusFeed> = Arc::new(FileFeed::open(cfg.spool_dir.join("feed"))?);
    let store: Arc<dyn SessionStore> =
        Arc::new(JsonStore::open(cfg.spool_dir.join("sessions.json"))?);
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(JsonCheckpoints::open(cfg.spool_dir.join("checkpoint.json"))?);

    let engine = Engine::new(feed.clone(), store);
    let (queue_tx, queue_rx) = mpsc::channel(cfg.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let deadline = cfg
        .run_budget
        .map(|budget| tokio::time::Instant::now() + budget);
    let poller = tokio::spawn(run_poller(
        feed,
        checkpoints,
        queue_tx,
        cfg.account.clone(),
        cfg.poll_interval,
        deadline,
        shutdown_rx.clone(),
    ));
    let engine_task = tokio::spawn(run_engine(engine, queue_rx, shutdown_rx));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let _ = poller.await;
    let _ = engine_task.await;
    info!("questbotd stopped");
    Ok(())
}
