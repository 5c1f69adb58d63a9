//! Per-session recommendation task.
//!
//! Each active session owns one task that wakes on a fixed period, reads the
//! last minute of persisted aggregates, and broadcasts a fresh
//! recommendation. Cancellation is checked before every tick, so no tick
//! starts once teardown has cancelled the token. A tick already running
//! finishes, but its append fails once the session is no longer active.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use engage_common::stats;

use crate::error::EngageError;
use crate::gateway::events::OutboundMessage;
use crate::gateway::registry::{SessionHandle, NO_DISCUSSION_CONTEXT};
use crate::models::engagement::WindowedEngagement;
use crate::AppState;

use super::prompts::{
    self, EngagementLevel, WindowStats, RECENT_CAPTION_LIMIT, RECOMMENDATION_FALLBACK,
    RECOMMENDATION_INSTRUCTION, SUMMARY_FALLBACK, SUMMARY_INSTRUCTION,
};

/// How far back each tick looks for aggregates, in seconds.
pub const RECOMMENDATION_WINDOW_SECS: i64 = 60;

/// Owner's handle on a running scheduler task.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Cancel future ticks. An in-flight tick is left to run to completion.
    pub fn stop(self) {
        self.cancel.cancel();
        drop(self.task);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Broadcast { history_len: usize, recipients: usize },
    /// No aggregates in the window; nothing computed or sent.
    NoData,
    /// The session is gone or no longer active.
    Aborted,
}

/// Start the recurring task for `session_id`. The first tick fires one full
/// period after activation.
pub fn spawn(state: AppState, session_id: String) -> SchedulerHandle {
    let period = Duration::from_secs(state.config.recommendation_interval_secs.max(1));
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match run_tick(&state, &session_id).await {
                        Ok(TickOutcome::Aborted) => break,
                        Ok(outcome) => {
                            tracing::debug!(session_id = %session_id, ?outcome, "recommendation tick");
                        }
                        Err(e) => {
                            tracing::error!(session_id = %session_id, error = %e, "recommendation tick failed");
                        }
                    }
                }
            }
        }

        tracing::debug!(session_id = %session_id, "recommendation scheduler stopped");
    });

    SchedulerHandle::new(cancel, task)
}

/// Run one recommendation pass for `session_id`.
///
/// Oracle failures are replaced with fallback text. Only a failed window
/// read is returned as an error, in which case nothing is broadcast.
pub async fn run_tick(state: &AppState, session_id: &str) -> Result<TickOutcome, EngageError> {
    let Some(session) = state.sessions.get(session_id) else {
        return Ok(TickOutcome::Aborted);
    };
    if !session.is_active() {
        return Ok(TickOutcome::Aborted);
    }

    let since = Utc::now() - chrono::TimeDelta::seconds(RECOMMENDATION_WINDOW_SECS);
    let window = state.store.group_engagements_since(session_id, since).await?;
    let Some(window_stats) = window_stats(&window) else {
        return Ok(TickOutcome::NoData);
    };

    let context = discussion_context(state, &session).await;
    let recommendation = recommend(state, &window_stats, &context).await;

    let Some(history) = session.push_recommendation(recommendation) else {
        return Ok(TickOutcome::Aborted);
    };
    let frame = OutboundMessage::Recommendation(history.clone()).encode()?;
    let recipients = state.connections.broadcast(&session.participants(), &frame);

    Ok(TickOutcome::Broadcast {
        history_len: history.len(),
        recipients,
    })
}

/// Fold a window of aggregates into group statistics. `None` on an empty
/// window.
pub fn window_stats(window: &[WindowedEngagement]) -> Option<WindowStats> {
    let means: Vec<f64> = window.iter().map(|w| w.record.engagement_score_mean).collect();
    let sds: Vec<f64> = window.iter().map(|w| w.record.engagement_score_sd).collect();
    let average_engagement_score = stats::mean(&means)?;
    let average_engagement_sd = stats::mean(&sds)?;

    let mut participant_series: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for entry in window {
        for p in &entry.participants {
            participant_series
                .entry(p.username.clone())
                .or_default()
                .push(p.engagement_score);
        }
    }

    Some(WindowStats {
        number_of_participants: window.iter().map(|w| w.participants.len()).max().unwrap_or(0),
        average_engagement_score,
        average_engagement_sd,
        group_engagement_trend: means,
        engagement_level: EngagementLevel::from_score(average_engagement_score),
        participant_series,
    })
}

/// Cached caption summary, recomputed only when the caption count moved.
async fn discussion_context(state: &AppState, session: &SessionHandle) -> String {
    let snapshot = session.caption_snapshot(RECENT_CAPTION_LIMIT);
    let cached = session.caption_cache();
    if snapshot.count == cached.caption_count {
        return cached.summary;
    }

    let transcript = prompts::transcript(&snapshot.recent);
    if transcript.is_empty() {
        session.store_caption_summary(snapshot.count, NO_DISCUSSION_CONTEXT.to_string());
        return NO_DISCUSSION_CONTEXT.to_string();
    }

    match state
        .oracle
        .generate(SUMMARY_INSTRUCTION, &prompts::summary_prompt(&transcript))
        .await
    {
        Ok(summary) => {
            session.store_caption_summary(snapshot.count, summary.clone());
            summary
        }
        Err(e) => {
            // Not cached: the next tick tries again.
            tracing::warn!(session_id = %session.session_id, error = %e, "caption summary failed");
            SUMMARY_FALLBACK.to_string()
        }
    }
}

async fn recommend(state: &AppState, window_stats: &WindowStats, context: &str) -> String {
    let prompt = match prompts::recommendation_prompt(window_stats, context) {
        Ok(prompt) => prompt,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build recommendation prompt");
            return RECOMMENDATION_FALLBACK.to_string();
        }
    };

    match state.oracle.generate(RECOMMENDATION_INSTRUCTION, &prompt).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "recommendation oracle failed");
            RECOMMENDATION_FALLBACK.to_string()
        }
    }
}
