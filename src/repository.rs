//! The persistence boundary (C6, §4.6, §6).
//!
//! A write-mostly side channel: the core never blocks game progress on it
//! and never treats its failures as authoritative (§7 kind 5, §9). The trait
//! is the external contract; [`InMemoryRepository`] is this system's
//! reference implementation, since the repository's concrete backing store
//! (e.g. Redis, as the original system used) is outside this core's scope.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{game::GameState, token::GameId};

/// The persisted unit of a game (§3, §6).
#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    pub id: GameId,
    pub name: String,
    pub player_count: usize,
    pub question_count: usize,
    pub state: GameState,
}

#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    /// Called on every state-affecting transition (ready, join, leave,
    /// state change). Best-effort: failures are logged, never propagated
    /// into game logic.
    async fn save_game(&self, summary: GameSummary);

    /// Backs `GET /games` (§4.9).
    async fn list_games(&self) -> Vec<GameSummary>;

    /// Called once, on entry to `Ended` (§4.4). Marks the summary ended and
    /// schedules its removal after the configured TTL; never blocks the
    /// caller on that wait.
    async fn expire_game(&self, id: GameId);
}

/// An in-process store behind a single mutex, holding only `HashMap`
/// operations across the lock — never an `.await` that waits on game logic
/// (§4.6's grounding of "never block game progress on it").
pub struct InMemoryRepository {
    summaries: Arc<Mutex<HashMap<GameId, GameSummary>>>,
    ttl: Duration,
}

impl InMemoryRepository {
    pub fn new(ttl: Duration) -> Arc<InMemoryRepository> {
        Arc::new(InMemoryRepository {
            summaries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        })
    }
}

#[async_trait::async_trait]
impl Repository for InMemoryRepository {
    async fn save_game(&self, summary: GameSummary) {
        let mut guard = self.summaries.lock().await;
        guard.insert(summary.id, summary);
    }

    async fn list_games(&self) -> Vec<GameSummary> {
        let guard = self.summaries.lock().await;
        guard.values().cloned().collect()
    }

    async fn expire_game(&self, id: GameId) {
        {
            let mut guard = self.summaries.lock().await;
            if let Some(summary) = guard.get_mut(&id) {
                summary.state = GameState::Ended;
            }
        }

        let summaries = self.summaries.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut guard = summaries.lock().await;
            guard.remove(&id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_list_round_trips_summary() {
        let repo = InMemoryRepository::new(Duration::from_secs(60));
        let id = GameId::random();
        repo.save_game(GameSummary {
            id,
            name: "g1".into(),
            player_count: 2,
            question_count: 3,
            state: GameState::Waiting,
        })
        .await;
        let games = repo.list_games().await;
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "g1");
    }

    #[tokio::test]
    async fn expire_sweep_removes_summary_after_ttl() {
        let repo = InMemoryRepository::new(Duration::from_millis(20));
        let id = GameId::random();
        repo.save_game(GameSummary {
            id,
            name: "g1".into(),
            player_count: 0,
            question_count: 1,
            state: GameState::Waiting,
        })
        .await;
        repo.expire_game(id).await;
        let games = repo.list_games().await;
        assert_eq!(games[0].state, GameState::Ended);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(repo.list_games().await.is_empty());
    }
}
