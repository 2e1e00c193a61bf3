//! Shared handle types passed between sessions, the Hub, and
//! GameCoordinators. None of these types own any state themselves — they
//! are cheap, cloneable endpoints onto channels owned elsewhere (§9: "a
//! Session holds a non-owning handle to Hub for dispatch", generalized to
//! every cross-entity reference in this system).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::{error::ServerError, token::GameId};

/// Bound on every session's outbound queue (§5, §8 S6). Chosen generously
/// for real traffic; tests that exercise the slow-client eviction path wire
/// up a smaller channel directly rather than waiting out this default.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 16;

/// Bound on the Hub's and each GameCoordinator's own inbound channels.
pub const CHANNEL_CAPACITY: usize = 32;

/// A frame queued for delivery to one session's transport. `Close` is the
/// explicit forced-disconnect primitive used by the back-pressure eviction
/// policy (§4.4, §4.5): dropping a `Sender` clone is not enough to close
/// the socket while other clones of the same sender remain alive, so
/// eviction is modeled as a message rather than relying on channel-drop
/// semantics.
#[derive(Clone)]
pub enum Outbound {
    Frame(Arc<str>),
    Close,
}

pub type OutboundSender = mpsc::Sender<Outbound>;

/// A non-owning reference to a live session, handed to the Hub at register
/// time and to a GameCoordinator at join time.
#[derive(Clone)]
pub struct SessionHandle {
    pub name: String,
    pub outbound: OutboundSender,
}

/// A `ready` or `start` command already resolved to the player who sent it.
#[derive(Debug)]
pub enum LobbyCommand {
    Ready { player: String },
    Start { player: String },
}

/// An `answer` command resolved to the player who sent it.
#[derive(Debug)]
pub struct AnswerSubmission {
    pub player: String,
    pub question_id: String,
    pub index: usize,
}

/// A non-owning reference to a live GameCoordinator's inbound channels
/// (§4.4). Cloning is cheap; every clone talks to the same coordinator
/// loop.
type CommandEnvelope = (LobbyCommand, oneshot::Sender<Result<(), ServerError>>);

#[derive(Clone)]
pub struct CoordinatorHandle {
    pub id: GameId,
    register_tx: mpsc::Sender<SessionHandle>,
    unregister_tx: mpsc::Sender<String>,
    commands_tx: mpsc::Sender<CommandEnvelope>,
    answers_tx: mpsc::Sender<AnswerSubmission>,
}

impl CoordinatorHandle {
    pub fn new(
        id: GameId,
        register_tx: mpsc::Sender<SessionHandle>,
        unregister_tx: mpsc::Sender<String>,
        commands_tx: mpsc::Sender<CommandEnvelope>,
        answers_tx: mpsc::Sender<AnswerSubmission>,
    ) -> Self {
        CoordinatorHandle {
            id,
            register_tx,
            unregister_tx,
            commands_tx,
            answers_tx,
        }
    }

    /// Blocking send: correctness requires the coordinator to observe every
    /// registration (§5's back-pressure summary).
    pub async fn register(&self, session: SessionHandle) {
        let _ = self.register_tx.send(session).await;
    }

    pub async fn unregister(&self, name: String) {
        let _ = self.unregister_tx.send(name).await;
    }

    /// `ready`/`start` admission (§7 kind 4): the coordinator alone knows
    /// whether the sender is a participant and what state the game is in, so
    /// it answers directly rather than the session guessing.
    pub async fn submit_command(&self, command: LobbyCommand) -> Result<(), ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands_tx.send((command, reply_tx)).await.is_err() {
            return Err(ServerError::UnknownGame);
        }
        reply_rx
            .await
            .unwrap_or(Err(ServerError::Internal("coordinator dropped a command reply".to_string())))
    }

    /// Fire-and-forget: stale or out-of-state answers are silently
    /// discarded by the coordinator (§4.4 "Answer arbitration"), not
    /// reported back to the sender.
    pub async fn submit_answer(&self, answer: AnswerSubmission) {
        let _ = self.answers_tx.send(answer).await;
    }
}

/// Messages a session (or a coordinator, acting on a session's behalf) sends
/// to the Hub loop (§4.5). Every operation that needs a result carries its
/// own reply channel, captured by the request (§9).
pub enum HubMessage {
    /// Pre-upgrade gate (§4.9): checked before the HTTP layer ever calls
    /// `ws.on_upgrade`, so a taken name is rejected with 400 without a
    /// socket ever being opened (§8 S4).
    NameAvailable {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Register {
        name: String,
        outbound: OutboundSender,
        reply: oneshot::Sender<Result<(), ServerError>>,
    },
    Disconnect {
        name: String,
    },
    /// A session has just been added as a participant of `game_id`; remove
    /// it from the lobby set and record it for `Disconnect` routing.
    JoinedGame {
        name: String,
        game_id: GameId,
    },
    /// A session has left its game (voluntarily or by eviction, or because
    /// the game ended); return it to the lobby set.
    LeftGame {
        name: String,
    },
    BroadcastAll {
        frame: Arc<str>,
    },
    BroadcastLobby {
        frame: Arc<str>,
    },
    NewGame {
        name: String,
        question_count: usize,
        reply: oneshot::Sender<Result<CoordinatorHandle, ServerError>>,
    },
    GetGame {
        game_id: GameId,
        reply: oneshot::Sender<Result<CoordinatorHandle, ServerError>>,
    },
    /// A coordinator's loop is about to terminate; drop it from the
    /// gameId→coordinator map.
    RemoveGame {
        game_id: GameId,
    },
}

/// A thin, cloneable handle onto the Hub's inbound channel. Every session
/// and coordinator task holds one of these rather than any direct reference
/// to Hub state.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubMessage>,
}

impl HubHandle {
    pub fn new(tx: mpsc::Sender<HubMessage>) -> Self {
        HubHandle { tx }
    }

    pub async fn name_available(&self, name: String) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(HubMessage::NameAvailable { name, reply: reply_tx }).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    pub async fn register(&self, name: String, outbound: OutboundSender) -> Result<(), ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubMessage::Register { name, outbound, reply: reply_tx })
            .await;
        reply_rx.await.unwrap_or(Err(ServerError::Internal(
            "hub loop dropped a register reply".to_string(),
        )))
    }

    pub async fn disconnect(&self, name: String) {
        let _ = self.tx.send(HubMessage::Disconnect { name }).await;
    }

    pub async fn joined_game(&self, name: String, game_id: GameId) {
        let _ = self.tx.send(HubMessage::JoinedGame { name, game_id }).await;
    }

    pub async fn left_game(&self, name: String) {
        let _ = self.tx.send(HubMessage::LeftGame { name }).await;
    }

    pub async fn broadcast_all(&self, frame: Arc<str>) {
        let _ = self.tx.send(HubMessage::BroadcastAll { frame }).await;
    }

    pub async fn broadcast_lobby(&self, frame: Arc<str>) {
        let _ = self.tx.send(HubMessage::BroadcastLobby { frame }).await;
    }

    pub async fn new_game(&self, name: String, question_count: usize) -> Result<CoordinatorHandle, ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubMessage::NewGame { name, question_count, reply: reply_tx })
            .await;
        reply_rx
            .await
            .unwrap_or(Err(ServerError::Internal("hub loop dropped a new_game reply".to_string())))
    }

    pub async fn get_game(&self, game_id: GameId) -> Result<CoordinatorHandle, ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(HubMessage::GetGame { game_id, reply: reply_tx }).await;
        reply_rx
            .await
            .unwrap_or(Err(ServerError::Internal("hub loop dropped a get_game reply".to_string())))
    }

    pub async fn remove_game(&self, game_id: GameId) {
        let _ = self.tx.send(HubMessage::RemoveGame { game_id }).await;
    }
}
