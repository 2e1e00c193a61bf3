//! The global registry and router (C5, §4.5).
//!
//! One loop owns every map this module touches; nothing outside it ever
//! reads or writes `all`, `lobby`, `participant_game`, or `games` directly
//! (§9: "Global mutable maps ... must not be accessed from outside the Hub
//! loop"). Every other task talks to it exclusively through [`HubHandle`].

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use log::{info, warn};
use tokio::sync::mpsc;

use crate::{
    catalog::Catalog,
    coordinator::GameCoordinator,
    error::{AdmissionError, ServerError},
    handles::{CoordinatorHandle, HubHandle, HubMessage, Outbound, CHANNEL_CAPACITY},
    protocol::{GameEvent, GameEventBody, PlayerEvent, PlayerEventBody},
    repository::Repository,
    token::GameId,
};

/// Spawns the Hub loop and returns a cloneable handle onto it. There is
/// exactly one of these per process.
pub fn spawn(
    catalog: Arc<Catalog>,
    repository: Arc<dyn Repository>,
    countdown_duration: Duration,
    question_duration: Duration,
) -> HubHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = HubHandle::new(tx);

    let state = Hub {
        all: HashMap::new(),
        lobby: HashSet::new(),
        participant_game: HashMap::new(),
        games: HashMap::new(),
        catalog,
        repository,
        countdown_duration,
        question_duration,
        self_handle: handle.clone(),
        rx,
    };

    tokio::spawn(state.run());
    handle
}

struct Hub {
    all: HashMap<String, crate::handles::SessionHandle>,
    lobby: HashSet<String>,
    participant_game: HashMap<String, GameId>,
    games: HashMap<GameId, CoordinatorHandle>,
    catalog: Arc<Catalog>,
    repository: Arc<dyn Repository>,
    countdown_duration: Duration,
    question_duration: Duration,
    self_handle: HubHandle,
    rx: mpsc::Receiver<HubMessage>,
}

fn encode_player_event(body: PlayerEventBody, player: String) -> Arc<str> {
    let event = PlayerEvent { player, body };
    Arc::from(serde_json::to_string(&event).expect("PlayerEvent always serializes").as_str())
}

impl Hub {
    async fn run(mut self) {
        info!("hub loop started");
        while let Some(message) = self.rx.recv().await {
            match message {
                HubMessage::NameAvailable { name, reply } => {
                    let _ = reply.send(!self.all.contains_key(&name));
                }
                HubMessage::Register { name, outbound, reply } => {
                    let result = self.register(name, outbound);
                    let _ = reply.send(result);
                }
                HubMessage::Disconnect { name } => {
                    self.disconnect(name);
                }
                HubMessage::JoinedGame { name, game_id } => {
                    self.lobby.remove(&name);
                    self.participant_game.insert(name, game_id);
                }
                HubMessage::LeftGame { name } => {
                    self.participant_game.remove(&name);
                    if self.all.contains_key(&name) {
                        self.lobby.insert(name);
                    }
                }
                HubMessage::BroadcastAll { frame } => {
                    self.broadcast_all(frame);
                }
                HubMessage::BroadcastLobby { frame } => {
                    self.broadcast_lobby(frame);
                }
                HubMessage::NewGame { name, question_count, reply } => {
                    let result = self.new_game(name, question_count);
                    let _ = reply.send(result);
                }
                HubMessage::GetGame { game_id, reply } => {
                    let result = self.games.get(&game_id).cloned().ok_or(ServerError::UnknownGame);
                    let _ = reply.send(result);
                }
                HubMessage::RemoveGame { game_id } => {
                    self.games.remove(&game_id);
                }
            }
        }
        info!("hub loop terminating");
    }

    fn register(&mut self, name: String, outbound: crate::handles::OutboundSender) -> Result<(), ServerError> {
        if name.is_empty() {
            return Err(ServerError::Admission(AdmissionError::EmptyName));
        }
        if self.all.contains_key(&name) {
            return Err(ServerError::Admission(AdmissionError::NameTaken));
        }

        // Broadcast before inserting so the joiner, not yet in `all`,
        // never receives a connect event about itself (§8 S1).
        let frame = encode_player_event(PlayerEventBody::PlayerConnect {}, name.clone());
        self.broadcast_all(frame);

        self.all.insert(name.clone(), crate::handles::SessionHandle { name: name.clone(), outbound });
        self.lobby.insert(name);
        Ok(())
    }

    fn disconnect(&mut self, name: String) {
        let handle = match self.all.remove(&name) {
            Some(handle) => handle,
            // Already gone; Disconnect can arrive twice (explicit teardown
            // racing an eviction) and must be idempotent.
            None => return,
        };
        let _ = handle.outbound.try_send(Outbound::Close);
        self.lobby.remove(&name);

        if let Some(game_id) = self.participant_game.remove(&name) {
            if let Some(coordinator) = self.games.get(&game_id).cloned() {
                let departing = name.clone();
                tokio::spawn(async move {
                    coordinator.unregister(departing).await;
                });
            }
        }

        let frame = encode_player_event(PlayerEventBody::PlayerDisconnect {}, name);
        self.broadcast_all(frame);
    }

    fn broadcast_all(&mut self, frame: Arc<str>) {
        let mut evicted = Vec::new();
        for (name, handle) in self.all.iter() {
            if handle.outbound.try_send(Outbound::Frame(frame.clone())).is_err() {
                evicted.push(name.clone());
            }
        }
        for name in evicted {
            self.disconnect(name);
        }
    }

    fn broadcast_lobby(&mut self, frame: Arc<str>) {
        let mut evicted = Vec::new();
        for name in self.lobby.iter() {
            if let Some(handle) = self.all.get(name) {
                if handle.outbound.try_send(Outbound::Frame(frame.clone())).is_err() {
                    evicted.push(name.clone());
                }
            }
        }
        for name in evicted {
            self.disconnect(name);
        }
    }

    fn new_game(&mut self, name: String, question_count: usize) -> Result<CoordinatorHandle, ServerError> {
        if question_count == 0 || question_count > self.catalog.len() {
            return Err(ServerError::Admission(AdmissionError::InvalidQuestionCount));
        }

        let questions = self.catalog.sample(question_count);

        let mut id = GameId::random();
        while self.games.contains_key(&id) {
            id = GameId::random();
        }

        let (game, ended_rx) = crate::game::Game::new(id, name.clone(), questions);
        let coordinator = GameCoordinator::spawn(
            game,
            ended_rx,
            self.self_handle.clone(),
            self.repository.clone(),
            self.countdown_duration,
            self.question_duration,
        );
        self.games.insert(id, coordinator.clone());

        let frame = Arc::from(
            serde_json::to_string(&GameEvent {
                id,
                body: GameEventBody::GameCreate { name, question_count },
            })
            .expect("GameEvent always serializes")
            .as_str(),
        );
        self.broadcast_lobby(frame);

        Ok(coordinator)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        warn!("hub state dropped with {} live games and {} sessions", self.games.len(), self.all.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{game::Question, handles::OUTBOUND_QUEUE_CAPACITY, repository::GameSummary};
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    struct NullRepository;

    #[async_trait::async_trait]
    impl Repository for NullRepository {
        async fn save_game(&self, _summary: GameSummary) {}
        async fn list_games(&self) -> Vec<GameSummary> {
            Vec::new()
        }
        async fn expire_game(&self, _id: GameId) {}
    }

    fn test_catalog() -> Arc<Catalog> {
        Arc::new(Catalog::test_catalog(vec![Question {
            id: "q0".into(),
            text: "2+2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_index: 1,
        }]))
    }

    fn spawn_test_hub() -> HubHandle {
        spawn(
            test_catalog(),
            Arc::new(NullRepository),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    async fn register(hub: &HubHandle, name: &str) -> Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        hub.register(name.to_string(), tx).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let hub = spawn_test_hub();
        let _alice_rx = register(&hub, "alice").await;
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let result = hub.register("alice".to_string(), tx).await;
        assert!(matches!(result, Err(ServerError::Admission(AdmissionError::NameTaken))));
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let hub = spawn_test_hub();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let result = hub.register(String::new(), tx).await;
        assert!(matches!(result, Err(ServerError::Admission(AdmissionError::EmptyName))));
    }

    #[tokio::test]
    async fn name_available_reflects_current_registrations() {
        let hub = spawn_test_hub();
        assert!(hub.name_available("alice".to_string()).await);
        let _alice_rx = register(&hub, "alice").await;
        assert!(!hub.name_available("alice".to_string()).await);
    }

    #[tokio::test]
    async fn an_already_connected_session_sees_the_next_connect() {
        let hub = spawn_test_hub();
        let mut alice_rx = register(&hub, "alice").await;
        let _bob_rx = register(&hub, "bob").await;
        // The broadcast for bob's own connect fires before he is inserted
        // into `all`, so only alice (already registered) observes it.
        let frame = match alice_rx.recv().await.unwrap() {
            Outbound::Frame(frame) => frame.to_string(),
            Outbound::Close => panic!("expected a frame"),
        };
        assert!(frame.contains("player_connect"));
        assert!(frame.contains("\"player\":\"bob\""));
    }

    #[tokio::test]
    async fn new_game_rejects_a_question_count_above_the_catalog_size() {
        let hub = spawn_test_hub();
        let result = hub.new_game("g1".to_string(), 5).await;
        assert!(matches!(result, Err(ServerError::Admission(AdmissionError::InvalidQuestionCount))));
    }

    #[tokio::test]
    async fn unknown_game_id_is_reported() {
        let hub = spawn_test_hub();
        let result = hub.get_game(GameId::random()).await;
        assert!(matches!(result, Err(ServerError::UnknownGame)));
    }
}
