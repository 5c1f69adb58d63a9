//! Applies call-lifecycle events to the session registry.
//!
//! Events for one call arrive in provider order and are handled in-line, so a
//! session's transitions never interleave.

use crate::error::EngageError;
use crate::models::session::SessionStart;
use crate::recommend::scheduler;
use crate::AppState;

use super::events::{
    session_id_from_cid, CallClosedCaption, CallCreated, CallEnded, CallEvent, CallRef,
    WebhookEvent,
};

/// Route one decoded webhook event to its handler.
pub async fn dispatch(state: &AppState, webhook: WebhookEvent) -> Result<(), EngageError> {
    match webhook.event {
        CallEvent::Created(event) => on_call_created(state, event).await,
        CallEvent::SessionStarted(event) => on_session_started(state, event),
        CallEvent::SessionEnded(event) => on_session_ended(state, event).await,
        CallEvent::Ended(event) => on_call_ended(state, event).await,
        CallEvent::ClosedCaption(event) => on_closed_caption(state, event),
        CallEvent::Unhandled => {
            tracing::warn!(kind = %webhook.kind, "unhandled call event");
            Ok(())
        }
    }
}

/// Register the session, start captions, and persist the session row.
///
/// Caption start failures are logged and do not block the session.
pub async fn on_call_created(state: &AppState, event: CallCreated) -> Result<(), EngageError> {
    let session_id = session_id_from_cid(&event.call_cid).to_string();
    let start = SessionStart {
        id: session_id.clone(),
        channel_id: event.call.custom.channel_id,
        initiated_by: event.call.created_by.id,
        starts_at: event.created_at,
    };

    let members = event.members.into_iter().map(|m| m.user_id);
    state.sessions.create_session(start.clone(), members)?;

    if let Err(e) = state.calls.start_closed_captions(&session_id).await {
        tracing::warn!(session_id = %session_id, error = %e, "failed to start closed captions");
    }

    state.store.create_session(&start).await?;

    tracing::info!(
        session_id = %session_id,
        channel_id = %start.channel_id,
        initiated_by = %start.initiated_by,
        "session created"
    );
    Ok(())
}

/// Activate the session and start its recommendation task.
pub fn on_session_started(state: &AppState, event: CallRef) -> Result<(), EngageError> {
    let session_id = session_id_from_cid(&event.call_cid);
    state.sessions.activate_session(session_id, || {
        scheduler::spawn(state.clone(), session_id.to_string())
    })?;

    tracing::info!(session_id = %session_id, "session started");
    Ok(())
}

/// Everyone left: end the call so the provider emits `call.ended`.
pub async fn on_session_ended(state: &AppState, event: CallRef) -> Result<(), EngageError> {
    let session_id = session_id_from_cid(&event.call_cid);
    state.calls.end_call(session_id).await?;

    tracing::info!(session_id = %session_id, "session ended, call closing");
    Ok(())
}

/// Tear the session down and write its final figures.
pub async fn on_call_ended(state: &AppState, event: CallEnded) -> Result<(), EngageError> {
    let session_id = session_id_from_cid(&event.call_cid);
    let destroyed = state
        .sessions
        .destroy_session(session_id, state.store.as_ref(), event.created_at)
        .await?;

    if !destroyed {
        return Err(EngageError::UnknownSession(session_id.to_string()));
    }

    tracing::info!(session_id = %session_id, "session destroyed");
    Ok(())
}

pub fn on_closed_caption(state: &AppState, event: CallClosedCaption) -> Result<(), EngageError> {
    let session_id = session_id_from_cid(&event.call_cid);
    let session = state
        .sessions
        .get(session_id)
        .ok_or_else(|| EngageError::UnknownSession(session_id.to_string()))?;

    session.push_caption(event.line());
    Ok(())
}
