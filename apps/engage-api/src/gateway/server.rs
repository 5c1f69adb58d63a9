//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::auth::tokens::Identity;
use crate::error::{ApiError, EngageError};
use crate::AppState;

use super::connections::ConnectionHandle;
use super::ingest::{self, IngestOutcome};

/// Close code sent when the session ended between upgrade and admission.
const CLOSE_SESSION_GONE: u16 = 4004;

/// Query parameters required to open a gateway connection.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Result<impl IntoResponse, ApiError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing token"))?;
    let session_id = params
        .session_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing sessionId"))?;

    let identity = state.verifier.verify(&token)?;

    if state.sessions.get(&session_id).is_none() {
        return Err(EngageError::UnknownSession(session_id).into());
    }

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, identity, session_id)))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    session_id: String,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(session) = state.sessions.get(&session_id) else {
        let _ = send_close(&mut ws_tx, CLOSE_SESSION_GONE, "Session ended").await;
        return;
    };

    let (handle, mut outbound) = ConnectionHandle::new(session_id.as_str());
    let connection_id = handle.connection_id().to_string();

    session.add_participant(&identity.user_id);
    drop(session);
    if let Some(previous) = state.connections.register(&identity.user_id, handle) {
        tracing::debug!(
            user_id = %identity.user_id,
            superseded = %previous.connection_id(),
            superseded_session = %previous.session_id(),
            "connection superseded"
        );
    }

    tracing::info!(
        %session_id,
        user_id = %identity.user_id,
        %connection_id,
        "gateway connection established"
    );

    // Writer: drain the outbound queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, %connection_id, "ws read error");
                break;
            }
        };

        let result = ingest::on_sample(
            &state,
            &session_id,
            &identity.user_id,
            &identity.username,
            text.as_str(),
        )
        .await;
        log_ingest_result(&session_id, &identity.user_id, result);
    }

    state
        .connections
        .unregister(&identity.user_id, &connection_id);
    // A replacement connection in the same session keeps reporting for this
    // user, so its sample stays. Anywhere else, this session loses the user.
    let replaced_here = state
        .connections
        .session_of(&identity.user_id)
        .is_some_and(|current| current == session_id);
    if !replaced_here {
        if let Some(session) = state.sessions.get(&session_id) {
            session.remove_sample(&identity.user_id);
        }
    }
    writer.abort();

    tracing::info!(
        %session_id,
        user_id = %identity.user_id,
        %connection_id,
        "gateway connection closed"
    );
}

fn log_ingest_result(session_id: &str, user_id: &str, result: Result<IngestOutcome, EngageError>) {
    match result {
        Ok(IngestOutcome::Broadcast { .. }) => {}
        Ok(IngestOutcome::Skipped(reason)) => {
            tracing::debug!(session_id, user_id, ?reason, "sample produced no broadcast");
        }
        Err(EngageError::Parse(reason)) => {
            tracing::debug!(session_id, user_id, %reason, "dropping malformed sample");
        }
        Err(err @ EngageError::Persistence(_)) => {
            tracing::error!(session_id, user_id, %err, "aggregate not persisted; broadcast skipped");
        }
        Err(err) => {
            tracing::warn!(session_id, user_id, %err, "sample ingestion failed");
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
