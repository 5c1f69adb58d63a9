use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use engage_common::Aggregate;

use crate::error::EngageError;
use crate::models::engagement::{
    GroupEngagement, ParticipantEngagement, ParticipantSample, ParticipantScore,
    WindowedEngagement,
};
use crate::models::session::{Session, SessionStart, SessionSummary};

/// Durable storage for sessions and their engagement aggregates.
///
/// Backed by Postgres in production and an in-memory map in tests.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Insert the session row for a newly created call.
    async fn create_session(&self, session: &SessionStart) -> Result<(), EngageError>;

    /// Insert one group aggregate and its participant breakdown atomically.
    async fn record_group_engagement(
        &self,
        session_id: &str,
        ts: DateTime<Utc>,
        aggregate: Aggregate,
        participants: &[ParticipantSample],
    ) -> Result<GroupEngagement, EngageError>;

    /// Every aggregate of a session, oldest first.
    async fn group_engagements(&self, session_id: &str) -> Result<Vec<GroupEngagement>, EngageError>;

    /// Aggregates with `ts >= since`, oldest first, each with its participants.
    async fn group_engagements_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WindowedEngagement>, EngageError>;

    /// Stamp the end time, overall statistics, and recommendations.
    async fn finish_session(
        &self,
        session_id: &str,
        summary: &SessionSummary,
    ) -> Result<(), EngageError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and local runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryData {
    sessions: HashMap<String, Session>,
    groups: Vec<GroupEngagement>,
    participants: Vec<ParticipantEngagement>,
    next_group_id: i64,
    next_participant_id: i64,
}

/// Map-backed store that honours the same referential rules as the schema.
pub struct MemoryStore {
    data: Mutex<MemoryData>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(MemoryData::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with `EngageError::Persistence`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of a stored session row.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.data.lock().sessions.get(session_id).cloned()
    }

    /// Number of participant rows attached to a group aggregate.
    pub fn participant_rows(&self, group_engagement_id: i64) -> usize {
        self.data
            .lock()
            .participants
            .iter()
            .filter(|p| p.group_engagement_id == group_engagement_id)
            .count()
    }

    fn check_writable(&self) -> Result<(), EngageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngageError::Persistence("store is read-only".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngagementStore for MemoryStore {
    async fn create_session(&self, session: &SessionStart) -> Result<(), EngageError> {
        self.check_writable()?;
        let mut data = self.data.lock();
        if data.sessions.contains_key(&session.id) {
            return Err(EngageError::Persistence(format!(
                "duplicate key sessions.id = {}",
                session.id
            )));
        }
        data.sessions.insert(
            session.id.clone(),
            Session {
                id: session.id.clone(),
                channel_id: session.channel_id.clone(),
                starts_at: session.starts_at,
                initiated_by: session.initiated_by.clone(),
                ends_at: None,
                overall_engagement_score_mean: None,
                overall_engagement_score_sd: None,
                recommendations: Vec::new(),
            },
        );
        Ok(())
    }

    async fn record_group_engagement(
        &self,
        session_id: &str,
        ts: DateTime<Utc>,
        aggregate: Aggregate,
        participants: &[ParticipantSample],
    ) -> Result<GroupEngagement, EngageError> {
        self.check_writable()?;
        let mut data = self.data.lock();
        if !data.sessions.contains_key(session_id) {
            return Err(EngageError::Persistence(format!(
                "foreign key violation: no session {session_id}"
            )));
        }

        data.next_group_id += 1;
        let record = GroupEngagement {
            id: data.next_group_id,
            session_id: session_id.to_string(),
            ts,
            engagement_score_mean: aggregate.mean,
            engagement_score_sd: aggregate.sd,
        };
        data.groups.push(record.clone());

        for sample in participants {
            data.next_participant_id += 1;
            let row = ParticipantEngagement {
                id: data.next_participant_id,
                group_engagement_id: record.id,
                username: sample.username.clone(),
                engagement_score: sample.engagement_score,
                features: serde_json::json!(sample.features),
            };
            data.participants.push(row);
        }

        Ok(record)
    }

    async fn group_engagements(&self, session_id: &str) -> Result<Vec<GroupEngagement>, EngageError> {
        let data = self.data.lock();
        let mut rows: Vec<GroupEngagement> = data
            .groups
            .iter()
            .filter(|g| g.session_id == session_id)
            .cloned()
            .collect();
        rows.sort_by_key(|g| (g.ts, g.id));
        Ok(rows)
    }

    async fn group_engagements_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WindowedEngagement>, EngageError> {
        let data = self.data.lock();
        let mut windowed: Vec<WindowedEngagement> = data
            .groups
            .iter()
            .filter(|g| g.session_id == session_id && g.ts >= since)
            .map(|g| WindowedEngagement {
                record: g.clone(),
                participants: data
                    .participants
                    .iter()
                    .filter(|p| p.group_engagement_id == g.id)
                    .map(|p| ParticipantScore {
                        username: p.username.clone(),
                        engagement_score: p.engagement_score,
                    })
                    .collect(),
            })
            .collect();
        windowed.sort_by_key(|w| (w.record.ts, w.record.id));
        Ok(windowed)
    }

    async fn finish_session(
        &self,
        session_id: &str,
        summary: &SessionSummary,
    ) -> Result<(), EngageError> {
        self.check_writable()?;
        let mut data = self.data.lock();
        let session = data.sessions.get_mut(session_id).ok_or_else(|| {
            EngageError::Persistence(format!("no session row {session_id}"))
        })?;
        session.ends_at = Some(summary.ends_at);
        session.overall_engagement_score_mean = summary.overall.map(|a| a.mean);
        session.overall_engagement_score_sd = summary.overall.map(|a| a.sd);
        session.recommendations = summary.recommendations.clone();
        Ok(())
    }
}
