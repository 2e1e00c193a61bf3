//! The per-game state machine driver (C4, §4.4).
//!
//! One task per live game, owning its [`Game`] exclusively: every mutation
//! happens inside [`Coordinator::run`]'s `select!` loop, so answer
//! arbitration, timer expiry, and join/leave bookkeeping never race each
//! other (§5, §9 "Single-consumer arbitration is the whole correctness
//! story").

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, info};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use crate::{
    error::{AdmissionError, ServerError},
    game::{Game, GameState},
    handles::{
        AnswerSubmission, CoordinatorHandle, HubHandle, LobbyCommand, Outbound, SessionHandle,
        CHANNEL_CAPACITY,
    },
    protocol::{GameEvent, GameEventBody, ReadyMap},
    repository::{GameSummary, Repository},
};

pub struct GameCoordinator;

impl GameCoordinator {
    /// Spawns the coordinator loop for a freshly created [`Game`] and
    /// returns the handle other tasks use to reach it. Called exclusively
    /// from the Hub's `NewGame` handler (§4.5).
    pub fn spawn(
        game: Game,
        ended_rx: oneshot::Receiver<()>,
        hub: HubHandle,
        repository: Arc<dyn Repository>,
        countdown_duration: Duration,
        question_duration: Duration,
    ) -> CoordinatorHandle {
        let (register_tx, register_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (answers_tx, answers_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let id = game.id();
        let handle = CoordinatorHandle::new(id, register_tx, unregister_tx, commands_tx, answers_tx);

        let state = Coordinator {
            game,
            _ended_rx: ended_rx,
            hub,
            repository,
            countdown_duration,
            question_duration,
            participants: HashMap::new(),
            countdown_deadline: None,
            question_deadline: None,
            register_rx,
            unregister_rx,
            commands_rx,
            answers_rx,
        };

        tokio::spawn(state.run());
        handle
    }
}

struct Coordinator {
    game: Game,
    /// Held for ownership only; `Game::advance` already returns whether the
    /// game just ended, so this coordinator never needs to poll the
    /// channel itself. Dropping it with the `Game` is what releases it.
    _ended_rx: oneshot::Receiver<()>,
    hub: HubHandle,
    repository: Arc<dyn Repository>,
    countdown_duration: Duration,
    question_duration: Duration,
    participants: HashMap<String, SessionHandle>,
    countdown_deadline: Option<Instant>,
    question_deadline: Option<Instant>,
    register_rx: mpsc::Receiver<SessionHandle>,
    unregister_rx: mpsc::Receiver<String>,
    commands_rx: mpsc::Receiver<(LobbyCommand, oneshot::Sender<Result<(), ServerError>>)>,
    answers_rx: mpsc::Receiver<AnswerSubmission>,
}

impl Coordinator {
    async fn run(mut self) {
        debug!("coordinator {} started", self.game.id());
        loop {
            tokio::select! {
                session = self.register_rx.recv() => {
                    match session {
                        Some(session) => self.handle_register(session).await,
                        None => break,
                    }
                }
                name = self.unregister_rx.recv() => {
                    match name {
                        Some(name) => self.remove_participant(&name).await,
                        None => break,
                    }
                }
                envelope = self.commands_rx.recv() => {
                    match envelope {
                        Some((command, reply)) => self.handle_command(command, reply).await,
                        None => break,
                    }
                }
                answer = self.answers_rx.recv() => {
                    match answer {
                        Some(answer) => self.handle_answer(answer).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(self.countdown_deadline.unwrap_or_else(Instant::now)), if self.countdown_deadline.is_some() => {
                    self.countdown_deadline = None;
                    self.enter_question().await;
                }
                _ = tokio::time::sleep_until(self.question_deadline.unwrap_or_else(Instant::now)), if self.question_deadline.is_some() => {
                    self.question_deadline = None;
                    self.question_timer_expired().await;
                }
            }

            if self.game.state() == GameState::Ended {
                break;
            }
        }
        debug!("coordinator {} terminating", self.game.id());
    }

    fn encode(&self, body: GameEventBody) -> Arc<str> {
        let event = GameEvent { id: self.game.id(), body };
        Arc::from(serde_json::to_string(&event).expect("GameEvent always serializes").as_str())
    }

    fn summary(&self) -> GameSummary {
        GameSummary {
            id: self.game.id(),
            name: self.game.name().to_string(),
            player_count: self.game.player_count(),
            question_count: self.game.question_count(),
            state: self.game.state(),
        }
    }

    async fn save_summary(&self) {
        self.repository.save_game(self.summary()).await;
    }

    /// Sends one frame to every current participant, evicting any whose
    /// queue is full (§4.4 back-pressure policy, §8 S6).
    async fn broadcast(&mut self, body: GameEventBody) {
        let frame = self.encode(body);
        let mut evicted = Vec::new();
        for (name, handle) in self.participants.iter() {
            if handle.outbound.try_send(Outbound::Frame(frame.clone())).is_err() {
                evicted.push(name.clone());
            }
        }
        for name in evicted {
            self.evict(&name).await;
        }
    }

    /// Like [`Self::broadcast`] but skips one participant (the joiner, for
    /// `game_player_join`).
    async fn broadcast_except(&mut self, body: GameEventBody, except: &str) {
        let frame = self.encode(body);
        let mut evicted = Vec::new();
        for (name, handle) in self.participants.iter() {
            if name == except {
                continue;
            }
            if handle.outbound.try_send(Outbound::Frame(frame.clone())).is_err() {
                evicted.push(name.clone());
            }
        }
        for name in evicted {
            self.evict(&name).await;
        }
    }

    async fn send_to(&mut self, target: &str, body: GameEventBody) {
        let frame = self.encode(body);
        let failed = match self.participants.get(target) {
            Some(handle) => handle.outbound.try_send(Outbound::Frame(frame)).is_err(),
            None => return,
        };
        if failed {
            self.evict(target).await;
        }
    }

    /// Forced removal on back-pressure (§4.4): close the queue, then run
    /// the same bookkeeping a voluntary leave would.
    async fn evict(&mut self, name: &str) {
        if let Some(handle) = self.participants.get(name) {
            let _ = handle.outbound.try_send(Outbound::Close);
        }
        self.remove_participant(name).await;
    }

    async fn handle_register(&mut self, session: SessionHandle) {
        let name = session.name.clone();
        self.game.add_player(name.clone());
        self.participants.insert(name.clone(), session);

        self.send_to(
            &name,
            GameEventBody::GamePlayerEnter {
                name: name.clone(),
                players: self.game.player_names(),
                players_ready: ReadyMap(self.game.players_ready()),
                question_count: self.game.question_count(),
            },
        )
        .await;
        self.broadcast_except(GameEventBody::GamePlayerJoin { player: name.clone() }, &name).await;

        let player_count = self.game.player_count();
        self.hub.broadcast_lobby(self.encode(GameEventBody::GamePlayerCount { player_count })).await;

        self.save_summary().await;
        self.hub.joined_game(name, self.game.id()).await;
    }

    /// Leave handling (§4.4): on `unregister` (disconnect-forwarded, or a
    /// back-pressure eviction routed through [`Self::evict`]). No-op if the
    /// player is not currently a participant (double removal is expected:
    /// an evicted session's own disconnect still arrives later).
    async fn remove_participant(&mut self, name: &str) {
        if self.participants.remove(name).is_none() {
            return;
        }
        self.game.remove_player(name);
        self.broadcast(GameEventBody::GamePlayerLeave { player: name.to_string() }).await;

        let player_count = self.game.player_count();
        self.hub.broadcast_lobby(self.encode(GameEventBody::GamePlayerCount { player_count })).await;
        self.save_summary().await;

        if player_count == 0 && self.game.state() != GameState::Ended {
            self.enter_ended().await;
        }
    }

    async fn handle_command(&mut self, command: LobbyCommand, reply: oneshot::Sender<Result<(), ServerError>>) {
        let result = match command {
            LobbyCommand::Ready { player } => {
                if !self.participants.contains_key(&player) {
                    Err(ServerError::Admission(AdmissionError::NotParticipant))
                } else {
                    self.game.mark_ready(&player);
                    self.broadcast(GameEventBody::GamePlayerReady { player }).await;
                    self.save_summary().await;
                    Ok(())
                }
            }
            LobbyCommand::Start { player } => self.try_start(&player).await,
        };
        let _ = reply.send(result);
    }

    /// Start admission (§4.4, §7 kind 4): only from `Waiting`, only by a
    /// participant, and only once at least one participant is ready. This
    /// implementation resolves the spec's documented choice in favor of
    /// requiring a ready participant (see DESIGN.md).
    async fn try_start(&mut self, player: &str) -> Result<(), ServerError> {
        if !self.participants.contains_key(player) {
            return Err(ServerError::Admission(AdmissionError::NotParticipant));
        }
        if self.game.state() != GameState::Waiting || !self.game.has_any_ready() {
            return Err(ServerError::Admission(AdmissionError::NotStartable));
        }

        self.broadcast(GameEventBody::GameStart {}).await;
        self.save_summary().await;
        self.enter_countdown().await;
        Ok(())
    }

    async fn enter_countdown(&mut self) {
        self.broadcast(GameEventBody::GameCountdown { seconds: self.countdown_duration.as_secs() }).await;
        self.game.set_state(GameState::Countdown);
        let lobby_frame = self.encode(GameEventBody::GameStateChange { state: self.game.state() });
        self.hub.broadcast_lobby(lobby_frame).await;
        self.countdown_deadline = Some(Instant::now() + self.countdown_duration);
        self.save_summary().await;
    }

    async fn enter_question(&mut self) {
        let question = match self.game.current_question() {
            Some(question) => question.clone(),
            // Game already ended underneath us; nothing to arm.
            None => return,
        };

        self.broadcast(GameEventBody::GameQuestion {
            id: question.id.clone(),
            question: question.text.clone(),
            options: question.options.clone(),
            seconds: self.question_duration.as_secs(),
        })
        .await;
        self.game.set_state(GameState::Question);
        let lobby_frame = self.encode(GameEventBody::GameStateChange { state: self.game.state() });
        self.hub.broadcast_lobby(lobby_frame).await;
        self.question_deadline = Some(Instant::now() + self.question_duration);

        self.save_summary().await;
    }

    async fn handle_answer(&mut self, answer: AnswerSubmission) {
        if self.game.state() != GameState::Question {
            return;
        }
        let current = match self.game.current_question() {
            Some(question) => question,
            None => return,
        };
        // Stale answers targeting a question we've already moved past are
        // discarded (§4.4 "Answer arbitration").
        if current.id != answer.question_id {
            return;
        }

        if self.game.validate_answer(answer.index) {
            // Stop the question timer atomically with the state
            // transition below: clearing the deadline here means the next
            // `select!` iteration can no longer observe its tick (§9).
            self.question_deadline = None;

            self.broadcast(GameEventBody::GamePlayerCorrect {
                id: answer.question_id,
                player: answer.player.clone(),
            })
            .await;
            self.game.increment_score(&answer.player);

            self.advance_or_end().await;
        } else {
            self.broadcast(GameEventBody::GamePlayerIncorrect {
                id: answer.question_id,
                player: answer.player,
            })
            .await;
        }
    }

    async fn question_timer_expired(&mut self) {
        if self.game.state() != GameState::Question {
            return;
        }
        self.advance_or_end().await;
    }

    async fn advance_or_end(&mut self) {
        if self.game.advance() {
            self.enter_ended().await;
        } else {
            self.save_summary().await;
            self.enter_countdown().await;
        }
    }

    /// Ended entry (§4.4): broadcast the final scores, tell the lobby,
    /// expire the summary, and release whoever is still a participant
    /// back to the lobby before the loop exits.
    async fn enter_ended(&mut self) {
        self.game.set_state(GameState::Ended);
        self.broadcast(GameEventBody::GameEnd { scores: self.game.scores_snapshot() }).await;

        let lobby_frame = self.encode(GameEventBody::GameStateChange { state: self.game.state() });
        self.hub.broadcast_lobby(lobby_frame).await;

        let repository = self.repository.clone();
        let id = self.game.id();
        tokio::spawn(async move {
            repository.expire_game(id).await;
        });

        let names: Vec<String> = self.participants.drain().map(|(name, _)| name).collect();
        for name in names {
            self.hub.left_game(name).await;
        }
        self.hub.remove_game(self.game.id()).await;
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        info!("coordinator {} dropped", self.game.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{game::Question, handles::{HubMessage, OUTBOUND_QUEUE_CAPACITY}, token::GameId};
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

    /// A Hub stand-in that just drains whatever the coordinator sends it
    /// (`broadcast_lobby`/`joined_game`/`left_game`/`remove_game` never
    /// expect a reply), so tests don't need a full Hub loop.
    fn fake_hub() -> HubHandle {
        let (tx, mut rx) = mpsc::channel::<HubMessage>(CHANNEL_CAPACITY);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        HubHandle::new(tx)
    }

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                text: format!("question {i}"),
                options: vec!["a".into(), "b".into()],
                correct_index: 0,
            })
            .collect()
    }

    fn spawn_test_coordinator(question_count: usize) -> CoordinatorHandle {
        let (game, ended_rx) = Game::new(GameId::random(), "g1".into(), questions(question_count));
        GameCoordinator::spawn(
            game,
            ended_rx,
            fake_hub(),
            Arc::new(NullRepository),
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
    }

    async fn register_participant(coordinator: &CoordinatorHandle, name: &str) -> Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        coordinator
            .register(SessionHandle { name: name.to_string(), outbound: tx })
            .await;
        rx
    }

    async fn next_frame(rx: &mut Receiver<Outbound>) -> String {
        match rx.recv().await.expect("channel closed before expected frame") {
            Outbound::Frame(frame) => frame.to_string(),
            Outbound::Close => panic!("expected a frame, got Close"),
        }
    }

    #[tokio::test]
    async fn start_is_rejected_without_a_ready_participant() {
        let coordinator = spawn_test_coordinator(1);
        let mut alice_rx = register_participant(&coordinator, "alice").await;
        let _ = next_frame(&mut alice_rx).await; // game_player_enter

        let result = coordinator.submit_command(LobbyCommand::Start { player: "alice".into() }).await;
        assert!(matches!(result, Err(ServerError::Admission(AdmissionError::NotStartable))));
    }

    #[tokio::test]
    async fn start_by_a_non_participant_is_rejected() {
        let coordinator = spawn_test_coordinator(1);
        let result = coordinator.submit_command(LobbyCommand::Start { player: "ghost".into() }).await;
        assert!(matches!(result, Err(ServerError::Admission(AdmissionError::NotParticipant))));
    }

    #[tokio::test]
    async fn single_question_game_ends_on_first_correct_answer() {
        let coordinator = spawn_test_coordinator(1);

        let mut alice_rx = register_participant(&coordinator, "alice").await;
        let _ = next_frame(&mut alice_rx).await; // game_player_enter

        coordinator
            .submit_command(LobbyCommand::Ready { player: "alice".into() })
            .await
            .unwrap();
        let _ = next_frame(&mut alice_rx).await; // game_player_ready

        coordinator
            .submit_command(LobbyCommand::Start { player: "alice".into() })
            .await
            .unwrap();
        // game_state_change is lobby-audience only (§4.2), so it never
        // reaches a participant's own channel.
        assert!(next_frame(&mut alice_rx).await.contains("game_start"));
        assert!(next_frame(&mut alice_rx).await.contains("game_countdown"));
        assert!(next_frame(&mut alice_rx).await.contains("game_question"));

        coordinator
            .submit_answer(AnswerSubmission { player: "alice".into(), question_id: "q0".into(), index: 0 })
            .await;
        assert!(next_frame(&mut alice_rx).await.contains("game_player_correct"));

        let end_frame = next_frame(&mut alice_rx).await;
        assert!(end_frame.contains("game_end"));
        assert!(end_frame.contains("\"score\":1"));
    }

    #[tokio::test]
    async fn wrong_answer_keeps_the_game_in_question_state() {
        let coordinator = spawn_test_coordinator(1);

        let mut alice_rx = register_participant(&coordinator, "alice").await;
        let _ = next_frame(&mut alice_rx).await;

        coordinator.submit_command(LobbyCommand::Ready { player: "alice".into() }).await.unwrap();
        let _ = next_frame(&mut alice_rx).await;
        coordinator.submit_command(LobbyCommand::Start { player: "alice".into() }).await.unwrap();
        let _ = next_frame(&mut alice_rx).await; // game_start
        let _ = next_frame(&mut alice_rx).await; // game_countdown
        let _ = next_frame(&mut alice_rx).await; // game_question

        coordinator
            .submit_answer(AnswerSubmission { player: "alice".into(), question_id: "q0".into(), index: 1 })
            .await;
        assert!(next_frame(&mut alice_rx).await.contains("game_player_incorrect"));

        // The question timer (20ms) still fires and ends the one-question game.
        let end_frame = next_frame(&mut alice_rx).await;
        assert!(end_frame.contains("game_end"));
    }

    #[tokio::test]
    async fn last_participant_leaving_ends_the_game_and_stops_the_loop() {
        let coordinator = spawn_test_coordinator(2);
        let mut alice_rx = register_participant(&coordinator, "alice").await;
        let _ = next_frame(&mut alice_rx).await; // game_player_enter

        coordinator.unregister("alice".into()).await;

        // The roster just emptied, so the coordinator entered Ended and its
        // loop returned; its inbound channels are now closed, so a further
        // command can no longer reach a live coordinator.
        let result = coordinator.submit_command(LobbyCommand::Ready { player: "alice".into() }).await;
        assert!(matches!(result, Err(ServerError::UnknownGame)));
    }

    #[tokio::test]
    async fn second_participant_sees_the_first_leave() {
        let coordinator = spawn_test_coordinator(2);
        let mut alice_rx = register_participant(&coordinator, "alice").await;
        let _ = next_frame(&mut alice_rx).await; // enter

        let mut bob_rx = register_participant(&coordinator, "bob").await;
        let _ = next_frame(&mut bob_rx).await; // bob's own enter
        assert!(next_frame(&mut alice_rx).await.contains("game_player_join"));

        coordinator.unregister("alice".into()).await;
        assert!(next_frame(&mut bob_rx).await.contains("game_player_leave"));
    }
}
