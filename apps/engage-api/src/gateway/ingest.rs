//! Per-message ingestion: update the sender's sample, recompute the group
//! aggregate, persist it, and fan the full history out to the session.

use chrono::Utc;

use engage_common::stats;

use crate::error::EngageError;
use crate::models::engagement::ParticipantScore;
use crate::AppState;

use super::events::{EngagementPayload, InboundSample, OutboundMessage};

/// Why a sample produced no broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The session is not (or no longer) registered.
    UnknownSession,
    /// The session has not started or is tearing down.
    Inactive,
    /// No samples were active when the aggregate was computed.
    NoParticipants,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Broadcast { history_len: usize, recipients: usize },
    Skipped(SkipReason),
}

/// Handle one inbound text frame from `user_id` in `session_id`.
///
/// A `ParseError` leaves the session untouched. A `PersistenceError` skips
/// this broadcast; the next sample retries with fresh state.
pub async fn on_sample(
    state: &AppState,
    session_id: &str,
    user_id: &str,
    username: &str,
    raw: &str,
) -> Result<IngestOutcome, EngageError> {
    let sample = InboundSample::parse(raw)?;

    let Some(session) = state.sessions.get(session_id) else {
        return Ok(IngestOutcome::Skipped(SkipReason::UnknownSession));
    };

    let mut history = session.lock_history().await;

    session.upsert_sample(user_id, sample.into_participant(username));
    if !session.is_active() {
        return Ok(IngestOutcome::Skipped(SkipReason::Inactive));
    }

    let samples = session.samples();
    let scores: Vec<f64> = samples.iter().map(|s| s.engagement_score).collect();
    let Some(aggregate) = stats::aggregate(&scores) else {
        return Ok(IngestOutcome::Skipped(SkipReason::NoParticipants));
    };

    let record = state
        .store
        .record_group_engagement(session_id, Utc::now(), aggregate, &samples)
        .await?;

    let breakdown: Vec<ParticipantScore> = samples
        .into_iter()
        .map(|s| ParticipantScore {
            username: s.username,
            engagement_score: s.engagement_score,
        })
        .collect();
    history.push(record, breakdown);

    let message = OutboundMessage::GroupEngagementData(EngagementPayload {
        group_data: history.group_data.clone(),
        participant_data: history.participant_data.clone(),
    });
    let frame = message.encode()?;

    let recipients = state.connections.broadcast(&session.participants(), &frame);

    tracing::debug!(
        session_id,
        user_id,
        mean = aggregate.mean,
        sd = aggregate.sd,
        recipients,
        "group engagement broadcast"
    );

    Ok(IngestOutcome::Broadcast {
        history_len: history.len(),
        recipients,
    })
}
