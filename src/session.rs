//! The per-connection message pump (C3, §4.3).
//!
//! One task per socket, split into a writer loop that drains a bounded
//! outbound queue and an inline reader loop that decodes commands and
//! dispatches each one to exactly one call on the Hub or a GameCoordinator.
//! Neither loop ever touches another session's state directly — all
//! cross-entity communication goes through [`HubHandle`] and
//! [`CoordinatorHandle`] (§9).

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::{
    error::ServerError,
    handles::{
        AnswerSubmission, HubHandle, LobbyCommand, Outbound, SessionHandle, OUTBOUND_QUEUE_CAPACITY,
    },
    protocol::{Command, CommandBody, ErrorReply},
};

/// Drives one accepted connection from registration to teardown. `name` has
/// already been validated as non-empty and available by the HTTP layer's
/// pre-upgrade check (§4.9), but registration re-checks it: the name could
/// have been taken by a racing connection between that check and this call.
pub async fn run(socket: WebSocket, name: String, hub: HubHandle) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_CAPACITY);

    if let Err(error) = hub.register(name.clone(), outbound_tx.clone()).await {
        let reply = ErrorReply { nonce: None, error: error.wire_message() };
        if let Ok(text) = serde_json::to_string(&reply) {
            let _ = sink.send(Message::Text(text)).await;
        }
        return;
    }

    let writer_name = name.clone();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        // Kind 1 (§7): a write failure is this loop's own
                        // problem to log; the reader's own disconnect path
                        // (or the next failed broadcast) drives teardown.
                        warn!("write failed for session {writer_name}, continuing drain");
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    read_loop(&mut stream, &name, &hub, &outbound_tx).await;

    hub.disconnect(name).await;
    let _ = writer.await;
}

async fn read_loop(
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
    name: &str,
    hub: &HubHandle,
    outbound_tx: &mpsc::Sender<Outbound>,
) {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            // Transport error or clean close: teardown exactly once, via
            // the caller's `hub.disconnect` after this loop returns (§7
            // kind 1).
            Some(Err(_)) | None => return,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return,
            // Ping/Pong/Binary carry no command payload for this protocol.
            _ => continue,
        };

        match serde_json::from_str::<Command>(&text) {
            Ok(command) => dispatch(command, name, hub, outbound_tx).await,
            Err(_) => reply_error(outbound_tx, None, ServerError::MalformedMessage).await,
        }
    }
}

async fn dispatch(command: Command, name: &str, hub: &HubHandle, outbound_tx: &mpsc::Sender<Outbound>) {
    let nonce = command.nonce.clone();
    let result = match command.body {
        CommandBody::Create { name: game_name, question_count } => {
            handle_create(game_name, question_count, name, hub, outbound_tx).await
        }
        CommandBody::Join { game_id } => handle_join(game_id, name, hub, outbound_tx).await,
        CommandBody::Ready { game_id } => handle_ready(game_id, name, hub).await,
        CommandBody::Start { game_id } => handle_start(game_id, name, hub).await,
        CommandBody::Answer { game_id, question_id, index } => {
            handle_answer(game_id, question_id, index, name, hub).await
        }
    };

    if let Err(error) = result {
        reply_error(outbound_tx, Some(nonce), error).await;
    }
}

/// `create` (§4.3): ask the Hub for a new coordinator, then immediately
/// offer this session for registration in it, exactly as `join` would.
async fn handle_create(
    game_name: String,
    question_count: usize,
    name: &str,
    hub: &HubHandle,
    outbound_tx: &mpsc::Sender<Outbound>,
) -> Result<(), ServerError> {
    let coordinator = hub.new_game(game_name, question_count).await?;
    coordinator
        .register(SessionHandle { name: name.to_string(), outbound: outbound_tx.clone() })
        .await;
    Ok(())
}

async fn handle_join(
    game_id: crate::token::GameId,
    name: &str,
    hub: &HubHandle,
    outbound_tx: &mpsc::Sender<Outbound>,
) -> Result<(), ServerError> {
    let coordinator = hub.get_game(game_id).await?;
    coordinator
        .register(SessionHandle { name: name.to_string(), outbound: outbound_tx.clone() })
        .await;
    Ok(())
}

async fn handle_ready(game_id: crate::token::GameId, name: &str, hub: &HubHandle) -> Result<(), ServerError> {
    let coordinator = hub.get_game(game_id).await?;
    coordinator.submit_command(LobbyCommand::Ready { player: name.to_string() }).await
}

async fn handle_start(game_id: crate::token::GameId, name: &str, hub: &HubHandle) -> Result<(), ServerError> {
    let coordinator = hub.get_game(game_id).await?;
    coordinator.submit_command(LobbyCommand::Start { player: name.to_string() }).await
}

async fn handle_answer(
    game_id: crate::token::GameId,
    question_id: String,
    index: usize,
    name: &str,
    hub: &HubHandle,
) -> Result<(), ServerError> {
    let coordinator = hub.get_game(game_id).await?;
    coordinator
        .submit_answer(AnswerSubmission { player: name.to_string(), question_id, index })
        .await;
    Ok(())
}

async fn reply_error(outbound_tx: &mpsc::Sender<Outbound>, nonce: Option<String>, error: ServerError) {
    debug!("rejecting command: {error}");
    let reply = ErrorReply { nonce, error: error.wire_message() };
    if let Ok(text) = serde_json::to_string(&reply) {
        let _ = outbound_tx.send(Outbound::Frame(text.into())).await;
    }
}
