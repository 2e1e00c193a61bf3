//! The authoritative in-memory game model (C1, §3, §4.1).
//!
//! A `Game` holds no channels, spawns no tasks, and performs no I/O; it is a
//! plain data structure that the owning [`crate::coordinator::GameCoordinator`]
//! mutates serially from its single loop (I5). Every method here assumes it is
//! the only caller in flight — that guarantee lives one layer up.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::token::GameId;

/// One multiple-choice question (§3 `Question`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "question")]
    pub text: String,
    pub options: Vec<String>,
    #[serde(rename = "correct_index")]
    pub correct_index: usize,
}

impl Question {
    /// `options.len() >= 2` and `correct_index` in bounds; checked once at
    /// catalog load time rather than on every game (§4.8).
    pub fn is_well_formed(&self) -> bool {
        self.options.len() >= 2 && self.correct_index < self.options.len()
    }
}

/// Lifecycle phase of a [`Game`] (§3 `state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Waiting,
    Countdown,
    Question,
    Ended,
}

/// A single player's score, exposed in the sorted snapshot used by
/// `game_end` (§4.2).
#[derive(Debug, Clone, Serialize)]
pub struct ScoreEntry {
    pub name: String,
    pub score: u32,
}

/// One entry in the game's roster, retained in insertion order so that the
/// scores snapshot can break ties deterministically (§4.1).
struct Player {
    name: String,
    ready: bool,
    score: u32,
}

/// The authoritative state of one game (§3).
pub struct Game {
    id: GameId,
    name: String,
    questions: Vec<Question>,
    current_index: usize,
    state: GameState,
    players: Vec<Player>,
    end_signal: Option<oneshot::Sender<()>>,
}

impl Game {
    /// Builds a new game in `Waiting` state with an empty roster. Returns the
    /// paired one-shot receiver the coordinator holds as a `select!` arm
    /// (§4.1's "one-shot end-channel, buffer 1, single consumer").
    pub fn new(id: GameId, name: String, questions: Vec<Question>) -> (Game, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let game = Game {
            id,
            name,
            questions,
            current_index: 0,
            state: GameState::Waiting,
            players: Vec::new(),
            end_signal: Some(tx),
        };
        (game, rx)
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn set_state(&mut self, state: GameState) {
        self.state = state;
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn has_player(&self, name: &str) -> bool {
        self.players.iter().any(|p| p.name == name)
    }

    pub fn has_any_ready(&self) -> bool {
        self.players.iter().any(|p| p.ready)
    }

    /// Player names in insertion order, for `game_player_enter` snapshots.
    pub fn player_names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }

    /// `{name: ready}` in insertion order, for `game_player_enter` snapshots.
    pub fn players_ready(&self) -> Vec<(String, bool)> {
        self.players.iter().map(|p| (p.name.clone(), p.ready)).collect()
    }

    /// `AddPlayer` (§4.1). Panics if `name` is already present — the Hub is
    /// responsible for enforcing name uniqueness before this is ever called.
    pub fn add_player(&mut self, name: String) {
        debug_assert!(!self.has_player(&name), "duplicate player name reached Game::add_player");
        self.players.push(Player { name, ready: false, score: 0 });
    }

    /// `RemovePlayer` (§4.1). No-op if absent.
    pub fn remove_player(&mut self, name: &str) {
        self.players.retain(|p| p.name != name);
    }

    /// `MarkReady` (§4.1). No-op if absent (repeated `ready` is idempotent,
    /// §8 round-trip property).
    pub fn mark_ready(&mut self, name: &str) {
        if let Some(player) = self.players.iter_mut().find(|p| p.name == name) {
            player.ready = true;
        }
    }

    /// `CurrentQuestion` (§4.1). Valid in `Countdown` or `Question` state,
    /// but deliberately also returns a value in `Ended` immediately after
    /// the final `Advance()` so late readers can still resolve the last
    /// question's id (§9 open question resolution).
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    /// `ValidateAnswer` (§4.1).
    pub fn validate_answer(&self, index: usize) -> bool {
        self.current_question()
            .map(|q| q.correct_index == index)
            .unwrap_or(false)
    }

    /// `IncrementScore` (§4.1).
    pub fn increment_score(&mut self, name: &str) {
        if let Some(player) = self.players.iter_mut().find(|p| p.name == name) {
            player.score += 1;
        }
    }

    /// `Advance` (§4.1, §9). At the last question this fires the end-signal
    /// exactly once and leaves `current_index` untouched; otherwise it moves
    /// forward by one. Returns `true` when the game has just ended.
    pub fn advance(&mut self) -> bool {
        if self.current_index + 1 >= self.questions.len() {
            if let Some(tx) = self.end_signal.take() {
                // The receiver may already be gone if the coordinator is
                // shutting down; a dropped end-signal is not this method's
                // problem to report (kind 6 would be advancing twice, which
                // `Option::take` makes structurally impossible).
                let _ = tx.send(());
            }
            true
        } else {
            self.current_index += 1;
            false
        }
    }

    /// Scores snapshot (§4.1): descending by score, ties broken by the
    /// roster's stable insertion order.
    pub fn scores_snapshot(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self
            .players
            .iter()
            .map(|p| ScoreEntry { name: p.name.clone(), score: p.score })
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.score));
        entries
    }
}
