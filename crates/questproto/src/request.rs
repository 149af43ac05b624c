//! Inbound request records produced by the feed poller.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::DecodeError;

/// Trigger tag for command help.
pub const TAG_HELP: &str = "help";
/// Trigger tag for creating a new game.
pub const TAG_CREATE: &str = "letsplay";
/// Trigger tag for starting a pending game.
pub const TAG_START: &str = "startgame";
/// Trigger tag for joining a pending game.
pub const TAG_JOIN: &str = "joingame";
/// Trigger tag for making a story selection.
pub const TAG_SELECT: &str = "chooseme";

/// What the author of a mention asked the bot to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Help,
    CreateGame,
    StartGame,
    JoinGame,
    MakeSelection,
    Unknown,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Help => "HELP",
            RequestType::CreateGame => "CREATE_GAME",
            RequestType::StartGame => "START_GAME",
            RequestType::JoinGame => "JOIN_GAME",
            RequestType::MakeSelection => "MAKE_SELECTION",
            RequestType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<RequestType> {
        match s {
            "HELP" => Some(RequestType::Help),
            "CREATE_GAME" => Some(RequestType::CreateGame),
            "START_GAME" => Some(RequestType::StartGame),
            "JOIN_GAME" => Some(RequestType::JoinGame),
            "MAKE_SELECTION" => Some(RequestType::MakeSelection),
            "UNKNOWN" => Some(RequestType::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RequestType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RequestType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RequestType::parse(&s)
            .ok_or_else(|| D::Error::custom(format!("unknown request type {s:?}")))
    }
}

/// Maps the hashtag set of a mention to the request it triggers.
///
/// Trigger tags are matched case-insensitively and checked in a fixed
/// priority order, so a post carrying several command tags resolves
/// deterministically: help beats create beats start beats join beats
/// selection.
pub fn classify(hashtags: &[String]) -> RequestType {
    let has = |tag: &str| hashtags.iter().any(|h| h.eq_ignore_ascii_case(tag));
    if has(TAG_HELP) {
        RequestType::Help
    } else if has(TAG_CREATE) {
        RequestType::CreateGame
    } else if has(TAG_START) {
        RequestType::StartGame
    } else if has(TAG_JOIN) {
        RequestType::JoinGame
    } else if has(TAG_SELECT) {
        RequestType::MakeSelection
    } else {
        RequestType::Unknown
    }
}

/// Pulls `#tag` tokens out of raw post text, lowercased and deduplicated
/// in order of first appearance. Tags end at the first character that is
/// not alphanumeric or `_`; a bare `#` yields nothing.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find('#') {
        rest = &rest[pos + 1..];
        let end = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        if end > 0 {
            let tag = rest[..end].to_ascii_lowercase();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        rest = &rest[end..];
    }
    tags
}

/// One normalized unit of work on the request queue.
///
/// Field names are the queue's wire contract; both ends must agree on
/// them. `hashtags` holds the lowercase tag set of the source post and is
/// used for classification and for selection matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRequest {
    pub request_type: RequestType,
    pub user_name: String,
    pub status_id: u64,
    #[serde(default)]
    pub in_reply_to_status_id: Option<u64>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub status_message: String,
}

impl GameRequest {
    /// Encodes the request as a single JSON line for the queue.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes one queue line. Unknown request types and missing required
    /// fields are decode errors, not silent defaults.
    pub fn from_json_line(line: &str) -> Result<GameRequest, DecodeError> {
        serde_json::from_str(line.trim()).map_err(DecodeError::BadJson)
    }
}
