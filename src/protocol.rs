//! Wire schemas for inbound commands and outbound events (C2, §4.2).
//!
//! Everything here is pure data plus (de)serialization; no dispatch logic
//! lives in this module. Field names are lowercase snake_case end to end
//! (§6), matched exactly against the tables in §4.2.

use serde::{ser::SerializeMap, Deserialize, Serialize};

use crate::game::{GameState, ScoreEntry};
use crate::token::GameId;

/// An inbound player command, still carrying its nonce for echoing back on
/// any direct reply (§4.2, §7).
#[derive(Debug, Deserialize)]
pub struct Command {
    pub nonce: String,
    #[serde(flatten)]
    pub body: CommandBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandBody {
    Create {
        name: String,
        question_count: usize,
    },
    Join {
        game_id: GameId,
    },
    Ready {
        game_id: GameId,
    },
    Start {
        game_id: GameId,
    },
    Answer {
        game_id: GameId,
        question_id: String,
        index: usize,
    },
}

impl CommandBody {
    /// The gameId a command targets, if any (`create` has none yet).
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            CommandBody::Create { .. } => None,
            CommandBody::Join { game_id }
            | CommandBody::Ready { game_id }
            | CommandBody::Start { game_id }
            | CommandBody::Answer { game_id, .. } => Some(*game_id),
        }
    }
}

/// A direct, session-private reply to a rejected or malformed command
/// (§4.2, §7). Never broadcast.
#[derive(Debug, Serialize)]
pub struct ErrorReply {
    pub nonce: Option<String>,
    pub error: String,
}

/// `{name: ready}` preserving roster insertion order, reused for the
/// `game_player_enter` snapshot (§4.2).
pub struct ReadyMap(pub Vec<(String, bool)>);

impl Serialize for ReadyMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, ready) in &self.0 {
            map.serialize_entry(name, ready)?;
        }
        map.end()
    }
}

/// `{player, type, payload}` (§4.2).
#[derive(Serialize)]
pub struct PlayerEvent {
    pub player: String,
    #[serde(flatten)]
    pub body: PlayerEventBody,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PlayerEventBody {
    PlayerConnect {},
    PlayerDisconnect {},
}

/// `{id, type, payload}` (§4.2).
#[derive(Serialize)]
pub struct GameEvent {
    pub id: GameId,
    #[serde(flatten)]
    pub body: GameEventBody,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GameEventBody {
    GameCreate {
        name: String,
        question_count: usize,
    },
    GameStateChange {
        state: GameState,
    },
    GamePlayerCount {
        player_count: usize,
    },
    GamePlayerEnter {
        name: String,
        players: Vec<String>,
        players_ready: ReadyMap,
        question_count: usize,
    },
    GamePlayerJoin {
        player: String,
    },
    GamePlayerReady {
        player: String,
    },
    GamePlayerLeave {
        player: String,
    },
    GameStart {},
    GameCountdown {
        seconds: u64,
    },
    GameQuestion {
        id: String,
        question: String,
        options: Vec<String>,
        seconds: u64,
    },
    GamePlayerCorrect {
        id: String,
        player: String,
    },
    GamePlayerIncorrect {
        id: String,
        player: String,
    },
    GameEnd {
        scores: Vec<ScoreEntry>,
    },
}
