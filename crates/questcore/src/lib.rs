//! Core pieces of the quest bot: the status feed boundary, session and
//! checkpoint persistence, the story graph, the feed poller, and the
//! game state engine. Binaries wire these together around an in-process
//! request queue.

pub mod checkpoint;
pub mod engine;
pub mod feed;
pub mod graph;
pub mod poller;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
