//! Wire and storage types shared by the feed poller and the game engine.
//!
//! Queue records are single JSON objects, one per line. The poller encodes
//! a [`GameRequest`] per inbound mention and the engine decodes it on the
//! other side, so the field names in [`request`] are a wire contract.
//! Session records in [`session`] use the PascalCase attribute names the
//! session table was created with.

use std::fmt;

pub mod request;
pub mod session;

pub use request::{classify, extract_hashtags, GameRequest, RequestType};
pub use session::{GameSession, GameState};

/// Error produced while decoding a queue record.
#[derive(Debug)]
pub enum DecodeError {
    /// The line was not a valid request object.
    BadJson(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadJson(err) => write!(f, "bad request record: {err}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::BadJson(err) => Some(err),
        }
    }
}
