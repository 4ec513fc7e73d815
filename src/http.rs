// SPDX-License-Identifier: AGPL-3.0-or-later

//! The HTTP/WebSocket boundary: auth-on-upgrade, document create/fetch, and
//! the `/ws` message channel. This is "boundary glue" (spec §2, ~15% of
//! core) — everything here translates between axum and the router/authority
//! underneath, none of it carries collaboration logic of its own.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::TokenSigner;
use crate::authority::DocumentRegistry;
use crate::protocol;
use crate::session::SessionRouter;

pub struct AppState {
    pub documents: Arc<DocumentRegistry>,
    pub sessions: Arc<SessionRouter>,
    pub token_signer: TokenSigner,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/docs", post(create_document))
        .route("/docs/:id", get(get_document))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "userId")]
    user_id: String,
}

async fn login(State(state): State<Arc<AppState>>, Json(request): Json<LoginRequest>) -> impl IntoResponse {
    let token = state.token_signer.sign(&request.user_id);
    Json(LoginResponse { token, user_id: request.user_id })
}

#[derive(Deserialize)]
struct CreateDocumentRequest {
    #[serde(default)]
    seed: String,
}

#[derive(Serialize)]
struct CreateDocumentResponse {
    #[serde(rename = "docId")]
    doc_id: String,
}

async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDocumentRequest>,
) -> impl IntoResponse {
    match state.documents.create_document(request.seed).await {
        Ok(doc_id) => Json(CreateDocumentResponse { doc_id }).into_response(),
        Err(err) => {
            warn!(%err, "failed to create document");
            axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[derive(Serialize)]
struct DocumentSnapshotResponse {
    content: String,
    version: u64,
}

async fn get_document(State(state): State<Arc<AppState>>, Path(doc_id): Path<String>) -> impl IntoResponse {
    match state.documents.load_or_attach(&doc_id).await {
        Ok(authority) => {
            let (content, version) = authority.snapshot().await;
            Json(DocumentSnapshotResponse { content, version }).into_response()
        }
        Err(crate::error::DocumentError::NotFound) => axum::http::StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!(%err, "failed to load document");
            axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match state.token_signer.verify(&query.token) {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)),
        Err(err) => {
            debug!(%err, "rejecting websocket upgrade, bad bearer token");
            axum::http::StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (session_id, mut outbound_rx) = state.sessions.on_connect(user_id);
    info!(session_id, "session connected");

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else { break };
                if socket.send(Message::Text(message.to_text())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match protocol::decode(&text) {
                            Ok(message) => state.sessions.on_message(&session_id, message).await,
                            Err(_) => state.sessions.send_malformed_message_error(&session_id).await,
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(session_id, %err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.on_disconnect(&session_id).await;
    info!(session_id, "session disconnected");
}
