//! The external HTTP and WebSocket-upgrade surface (C9, §4.9).
//!
//! Thin by design: every route either reads the Repository's read-only view
//! or hands a freshly split socket straight to [`crate::session::run`]. No
//! game logic lives here.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper::header::ORIGIN;
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{config::Config, handles::HubHandle, repository::Repository, session};

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub repository: Arc<dyn Repository>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/games", get(list_games))
        .route("/connect", get(connect))
        .route("/leaderboard", get(leaderboard))
        .with_state(state)
        .layer(cors)
}

/// An empty allow-list means reject all cross-origin requests (§6 default),
/// so `CorsLayer::new()` with no `allow_origin` call is the correct posture
/// rather than an oversight.
fn cors_layer(config: &Config) -> CorsLayer {
    if config.allowed_origins.is_empty() {
        return CorsLayer::new();
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
}

/// `GET /games` (§4.9): 200 with the summary list, 204 when there are none.
async fn list_games(State(state): State<AppState>) -> Response {
    let games = state.repository.list_games().await;
    if games.is_empty() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        Json(games).into_response()
    }
}

/// `GET /leaderboard` (§4.9): out of scope per the per-player analytics
/// Non-goal; always the static placeholder.
async fn leaderboard() -> Json<Vec<serde_json::Value>> {
    Json(Vec::new())
}

#[derive(Deserialize)]
struct ConnectQuery {
    name: String,
}

/// `GET /connect?name=` (§4.9): validates the origin and the name, then
/// upgrades. Registration proper (and the re-check of name availability
/// against a racing connection) happens inside [`crate::session::run`].
async fn connect(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    if !origin_allowed(&state.config, &headers) {
        return Err(StatusCode::FORBIDDEN);
    }

    let name = query.name;
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !state.hub.name_available(name.clone()).await {
        return Err(StatusCode::BAD_REQUEST);
    }

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| session::run(socket, name, hub)))
}

/// A present `Origin` must match the configured allow-list. An absent one
/// (same-origin requests, and non-browser clients that never send the
/// header) is let through — this implementation's resolution of an open
/// question in the origin policy (see DESIGN.md).
fn origin_allowed(config: &Config, headers: &HeaderMap) -> bool {
    match headers.get(ORIGIN).and_then(|value| value.to_str().ok()) {
        Some(origin) => config.origin_allowed(origin),
        None => true,
    }
}
