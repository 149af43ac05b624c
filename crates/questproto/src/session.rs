//! Persisted game session records.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Most players a single session will carry, creator included.
pub const MAX_PLAYERS: usize = 4;

/// Lifecycle state of a session.
///
/// Sessions move strictly forward: created as `PendingGameStart`, flipped
/// to `PendingGameInput` by the first narrative post, and parked at
/// `GameComplete` once an ending node is posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    PendingGameStart,
    PendingGameInput,
    GameComplete,
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::PendingGameStart => "PENDING_GAME_START",
            GameState::PendingGameInput => "PENDING_GAME_INPUT",
            GameState::GameComplete => "GAME_COMPLETE",
        }
    }

    pub fn parse(s: &str) -> Option<GameState> {
        match s {
            "PENDING_GAME_START" => Some(GameState::PendingGameStart),
            "PENDING_GAME_INPUT" => Some(GameState::PendingGameInput),
            "GAME_COMPLETE" => Some(GameState::GameComplete),
            _ => None,
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for GameState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GameState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        GameState::parse(&s).ok_or_else(|| D::Error::custom(format!("unknown game state {s:?}")))
    }
}

/// One running (or finished) game, keyed by the id of the invitation post
/// that announced it.
///
/// Attribute names match the session table schema, hence the PascalCase.
/// `Version` backs the conditional writes in the store; `0` means the
/// record has never been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameSession {
    pub tweet_start_id: u64,
    pub game_state: GameState,
    pub game_creator: String,
    pub players: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tweet_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_game_step: Option<u32>,
    pub twitter_steps: Vec<u64>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub created_at_unix: u64,
}

impl GameSession {
    /// Fresh session in `PendingGameStart`, creator seeded as the first
    /// player and the inbound create request as the first step in the
    /// post trail.
    pub fn new(
        tweet_start_id: u64,
        creator: &str,
        create_request_id: u64,
        created_at_unix: u64,
    ) -> GameSession {
        GameSession {
            tweet_start_id,
            game_state: GameState::PendingGameStart,
            game_creator: creator.to_string(),
            players: vec![creator.to_string()],
            current_tweet_id: None,
            current_game_step: None,
            twitter_steps: vec![create_request_id],
            version: 0,
            created_at_unix,
        }
    }

    pub fn has_player(&self, user_name: &str) -> bool {
        self.players.iter().any(|p| p == user_name)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    pub fn is_complete(&self) -> bool {
        self.game_state == GameState::GameComplete
    }

    /// Records a successfully posted narrative step: appends it to the
    /// post trail and makes it the post selections must reply to.
    pub fn record_step(&mut self, post_id: u64, step: u32) {
        self.twitter_steps.push(post_id);
        self.current_tweet_id = Some(post_id);
        self.current_game_step = Some(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_shape() {
        let s = GameSession::new(100, "alice", 42, 1_700_000_000);
        assert_eq!(s.game_state, GameState::PendingGameStart);
        assert_eq!(s.players, vec!["alice".to_string()]);
        assert_eq!(s.twitter_steps, vec![42]);
        assert_eq!(s.current_tweet_id, None);
        assert_eq!(s.current_game_step, None);
        assert_eq!(s.version, 0);
    }

    #[test]
    fn membership_and_capacity() {
        let mut s = GameSession::new(100, "alice", 42, 0);
        assert!(s.has_player("alice"));
        assert!(!s.has_player("bob"));
        for name in ["bob", "carol", "dave"] {
            s.players.push(name.to_string());
        }
        assert!(s.is_full());
    }

    #[test]
    fn record_step_extends_the_trail() {
        let mut s = GameSession::new(100, "alice", 42, 0);
        s.record_step(101, 1);
        s.record_step(102, 3);
        assert_eq!(s.twitter_steps, vec![42, 101, 102]);
        assert_eq!(s.current_tweet_id, Some(102));
        assert_eq!(s.current_game_step, Some(3));
    }

    #[test]
    fn records_use_table_attribute_names() {
        let s = GameSession::new(100, "alice", 42, 7);
        let value = serde_json::to_value(&s).unwrap();
        assert_eq!(value["TweetStartId"], 100);
        assert_eq!(value["GameState"], "PENDING_GAME_START");
        assert_eq!(value["GameCreator"], "alice");
        assert_eq!(value["TwitterSteps"][0], 42);
        assert_eq!(value["CreatedAtUnix"], 7);
        assert!(value.get("CurrentTweetId").is_none());
    }

    #[test]
    fn decodes_records_written_before_versioning() {
        let line = r#"{
            "TweetStartId": 5,
            "GameState": "PENDING_GAME_INPUT",
            "GameCreator": "alice",
            "Players": ["alice", "bob"],
            "CurrentTweetId": 9,
            "CurrentGameStep": 1,
            "TwitterSteps": [4, 9]
        }"#;
        let s: GameSession = serde_json::from_str(line).unwrap();
        assert_eq!(s.version, 0);
        assert_eq!(s.created_at_unix, 0);
        assert_eq!(s.current_tweet_id, Some(9));
    }

    #[test]
    fn rejects_unknown_game_state() {
        let line = r#"{
            "TweetStartId": 5,
            "GameState": "PLAYING",
            "GameCreator": "alice",
            "Players": ["alice"],
            "TwitterSteps": [4]
        }"#;
        assert!(serde_json::from_str::<GameSession>(line).is_err());
    }
}
