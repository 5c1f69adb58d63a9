//! Registry of live call sessions.
//!
//! `DashMap` keeps lookups for different sessions from contending. Inside an
//! entry, quick bookkeeping sits behind a `parking_lot::Mutex`, while the
//! aggregate history sits behind an async mutex that ingestion holds across
//! its read-compute-persist-append sequence. That async mutex is the single
//! serialization point per session.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use engage_common::stats;

use crate::db::store::EngagementStore;
use crate::error::EngageError;
use crate::models::engagement::{GroupEngagement, ParticipantSample, ParticipantScore};
use crate::models::session::{SessionStart, SessionSummary};
use crate::recommend::scheduler::SchedulerHandle;

/// Summary used until the first caption arrives.
pub const NO_DISCUSSION_CONTEXT: &str = "No recent discussion context available.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Created,
    Active,
    Stopped,
}

/// Caption summary reused while the caption count is unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionCache {
    pub caption_count: usize,
    pub summary: String,
}

/// Captions as seen by one scheduler tick.
#[derive(Debug, Clone)]
pub struct CaptionSnapshot {
    pub count: usize,
    pub recent: Vec<String>,
}

/// Aggregate records and their parallel participant breakdowns, oldest first.
#[derive(Debug, Default)]
pub struct AggregateHistory {
    pub group_data: Vec<GroupEngagement>,
    pub participant_data: Vec<Vec<ParticipantScore>>,
}

impl AggregateHistory {
    pub fn push(&mut self, record: GroupEngagement, participants: Vec<ParticipantScore>) {
        self.group_data.push(record);
        self.participant_data.push(participants);
    }

    pub fn len(&self) -> usize {
        self.group_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group_data.is_empty()
    }
}

struct SessionState {
    phase: SessionPhase,
    participants: HashSet<String>,
    samples: BTreeMap<String, ParticipantSample>,
    captions: Vec<String>,
    caption_cache: CaptionCache,
    recommendations: Vec<String>,
    scheduler: Option<SchedulerHandle>,
}

/// One registered session.
pub struct SessionHandle {
    pub session_id: String,
    pub start: SessionStart,
    state: Mutex<SessionState>,
    history: tokio::sync::Mutex<AggregateHistory>,
}

impl SessionHandle {
    fn new(start: SessionStart, participants: HashSet<String>) -> Self {
        Self {
            session_id: start.id.clone(),
            start,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Created,
                participants,
                samples: BTreeMap::new(),
                captions: Vec::new(),
                caption_cache: CaptionCache {
                    caption_count: 0,
                    summary: NO_DISCUSSION_CONTEXT.to_string(),
                },
                recommendations: Vec::new(),
                scheduler: None,
            }),
            history: tokio::sync::Mutex::new(AggregateHistory::default()),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }

    pub fn add_participant(&self, user_id: &str) {
        self.state.lock().participants.insert(user_id.to_string());
    }

    pub fn participants(&self) -> Vec<String> {
        self.state.lock().participants.iter().cloned().collect()
    }

    /// Last-write-wins overwrite of a user's sample.
    pub fn upsert_sample(&self, user_id: &str, sample: ParticipantSample) {
        self.state.lock().samples.insert(user_id.to_string(), sample);
    }

    pub fn remove_sample(&self, user_id: &str) -> bool {
        self.state.lock().samples.remove(user_id).is_some()
    }

    /// Current samples, ordered by user id.
    pub fn samples(&self) -> Vec<ParticipantSample> {
        self.state.lock().samples.values().cloned().collect()
    }

    pub fn push_caption(&self, line: String) {
        self.state.lock().captions.push(line);
    }

    /// Caption count plus the most recent `limit` lines.
    pub fn caption_snapshot(&self, limit: usize) -> CaptionSnapshot {
        let state = self.state.lock();
        let skip = state.captions.len().saturating_sub(limit);
        CaptionSnapshot {
            count: state.captions.len(),
            recent: state.captions[skip..].to_vec(),
        }
    }

    pub fn caption_cache(&self) -> CaptionCache {
        self.state.lock().caption_cache.clone()
    }

    pub fn store_caption_summary(&self, caption_count: usize, summary: String) {
        self.state.lock().caption_cache = CaptionCache {
            caption_count,
            summary,
        };
    }

    /// Append a recommendation and return the full log, newest last.
    ///
    /// Returns `None` once the session has left the active phase.
    pub fn push_recommendation(&self, text: String) -> Option<Vec<String>> {
        let mut state = self.state.lock();
        if state.phase != SessionPhase::Active {
            return None;
        }
        state.recommendations.push(text);
        Some(state.recommendations.clone())
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.state.lock().recommendations.clone()
    }

    /// Exclusive access to the aggregate history. Held across persistence.
    pub async fn lock_history(&self) -> tokio::sync::MutexGuard<'_, AggregateHistory> {
        self.history.lock().await
    }

    /// Move to `Stopped` and cancel the scheduler. Safe to repeat.
    fn stop(&self) {
        let scheduler = {
            let mut state = self.state.lock();
            state.phase = SessionPhase::Stopped;
            state.scheduler.take()
        };
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }
    }
}

/// Shared registry of all live sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Install an empty entry in the `Created` phase.
    pub fn create_session(
        &self,
        start: SessionStart,
        participants: impl IntoIterator<Item = String>,
    ) -> Result<Arc<SessionHandle>, EngageError> {
        match self.sessions.entry(start.id.clone()) {
            Entry::Occupied(_) => Err(EngageError::DuplicateSession(start.id)),
            Entry::Vacant(slot) => {
                let handle = Arc::new(SessionHandle::new(start, participants.into_iter().collect()));
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Move a created session to `Active` and start its scheduler.
    ///
    /// `start_scheduler` runs only when the transition is valid.
    pub fn activate_session<F>(
        &self,
        session_id: &str,
        start_scheduler: F,
    ) -> Result<Arc<SessionHandle>, EngageError>
    where
        F: FnOnce() -> SchedulerHandle,
    {
        let handle = self
            .get(session_id)
            .ok_or_else(|| EngageError::UnknownSession(session_id.to_string()))?;

        {
            let mut state = handle.state.lock();
            if state.phase != SessionPhase::Created {
                return Err(EngageError::InvalidTransition {
                    session_id: session_id.to_string(),
                    phase: state.phase,
                });
            }
            state.phase = SessionPhase::Active;
            state.scheduler = Some(start_scheduler());
        }

        Ok(handle)
    }

    /// Look up a session. Callers treat `None` as a no-op.
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Stop the scheduler, write the session's final figures, and drop the
    /// entry.
    ///
    /// Waits for any in-flight ingestion so the final statistics include it.
    /// Returns `Ok(false)` when there was nothing to destroy. The entry is
    /// removed even if the final write fails; the error is still returned.
    ///
    /// The entry stays registered until the flush has run, so a call whose
    /// future was dropped part way can simply be repeated.
    pub async fn destroy_session(
        &self,
        session_id: &str,
        store: &dyn EngagementStore,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, EngageError> {
        let Some(handle) = self.get(session_id) else {
            return Ok(false);
        };
        handle.stop();

        let history = handle.lock_history().await;
        // A concurrent teardown may have finished while we waited.
        let still_registered = self
            .sessions
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), &handle));
        if !still_registered {
            return Ok(false);
        }

        let flushed = flush_summary(&handle, store, ended_at).await;
        self.sessions
            .remove_if(session_id, |_, entry| Arc::ptr_eq(entry, &handle));
        drop(history);

        flushed.map(|_| true)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall mean-of-means / mean-of-SDs over the persisted history.
async fn flush_summary(
    handle: &SessionHandle,
    store: &dyn EngagementStore,
    ended_at: DateTime<Utc>,
) -> Result<(), EngageError> {
    let records = store.group_engagements(&handle.session_id).await?;
    let overall = stats::mean_of_aggregates(records.iter().map(|r| stats::Aggregate {
        mean: r.engagement_score_mean,
        sd: r.engagement_score_sd,
    }));

    let summary = SessionSummary {
        ends_at: ended_at,
        overall,
        recommendations: handle.recommendations(),
    };
    store.finish_session(&handle.session_id, &summary).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::MemoryStore;
    use tokio_util::sync::CancellationToken;

    fn start(id: &str) -> SessionStart {
        SessionStart {
            id: id.to_string(),
            channel_id: "ch1".to_string(),
            initiated_by: "host".to_string(),
            starts_at: Utc::now(),
        }
    }

    fn idle_scheduler(cancel: &CancellationToken) -> SchedulerHandle {
        SchedulerHandle::new(cancel.clone(), tokio::spawn(async {}))
    }

    fn sample(score: f64) -> ParticipantSample {
        ParticipantSample {
            username: "u".to_string(),
            features: vec![],
            engagement_score: score,
        }
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let registry = SessionRegistry::new();
        registry.create_session(start("s1"), Vec::new()).unwrap();
        let err = registry.create_session(start("s1"), Vec::new()).err().unwrap();
        assert!(matches!(err, EngageError::DuplicateSession(id) if id == "s1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_unknown_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn activate_unknown_session_fails() {
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let err = registry
            .activate_session("ghost", || idle_scheduler(&cancel))
            .err()
            .unwrap();
        assert!(matches!(err, EngageError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn activate_twice_is_an_invalid_transition() {
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        registry.create_session(start("s1"), Vec::new()).unwrap();

        let handle = registry.activate_session("s1", || idle_scheduler(&cancel)).unwrap();
        assert!(handle.is_active());

        let mut started_again = false;
        let err = registry
            .activate_session("s1", || {
                started_again = true;
                idle_scheduler(&cancel)
            })
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EngageError::InvalidTransition { phase: SessionPhase::Active, .. }
        ));
        assert!(!started_again);
    }

    #[tokio::test]
    async fn destroy_cancels_scheduler_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        store.create_session(&start("s1")).await.unwrap();
        registry.create_session(start("s1"), Vec::new()).unwrap();
        registry.activate_session("s1", || idle_scheduler(&cancel)).unwrap();

        assert!(registry.destroy_session("s1", &store, Utc::now()).await.unwrap());
        assert!(cancel.is_cancelled());
        assert!(registry.get("s1").is_none());

        assert!(!registry.destroy_session("s1", &store, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn destroy_without_aggregates_persists_no_statistics() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();

        store.create_session(&start("s1")).await.unwrap();
        registry.create_session(start("s1"), Vec::new()).unwrap();
        registry.destroy_session("s1", &store, Utc::now()).await.unwrap();

        let row = store.session("s1").unwrap();
        assert!(row.ends_at.is_some());
        assert!(row.overall_engagement_score_mean.is_none());
        assert!(row.overall_engagement_score_sd.is_none());
    }

    #[tokio::test]
    async fn destroy_persists_mean_of_means() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();

        store.create_session(&start("s1")).await.unwrap();
        registry.create_session(start("s1"), Vec::new()).unwrap();
        for (mean, sd) in [(0.8, 0.1), (0.6, 0.3)] {
            store
                .record_group_engagement("s1", Utc::now(), stats::Aggregate { mean, sd }, &[sample(mean)])
                .await
                .unwrap();
        }

        registry.destroy_session("s1", &store, Utc::now()).await.unwrap();

        let row = store.session("s1").unwrap();
        assert!((row.overall_engagement_score_mean.unwrap() - 0.7).abs() < 1e-9);
        assert!((row.overall_engagement_score_sd.unwrap() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_flush_still_releases_the_entry() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();
        registry.create_session(start("s1"), Vec::new()).unwrap();

        // No session row exists, so the final write fails.
        let err = registry.destroy_session("s1", &store, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngageError::Persistence(_)));
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn interrupted_destroy_can_be_repeated() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        store.create_session(&start("s1")).await.unwrap();
        let handle = registry.create_session(start("s1"), Vec::new()).unwrap();
        registry.activate_session("s1", || idle_scheduler(&cancel)).unwrap();

        // An ingestion holding the history lock keeps the first destroy
        // waiting until its future is dropped.
        let ingest = handle.lock_history().await;
        let first = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            registry.destroy_session("s1", &store, Utc::now()),
        )
        .await;
        assert!(first.is_err());
        assert!(cancel.is_cancelled());
        assert!(registry.get("s1").is_some());
        drop(ingest);

        assert!(registry.destroy_session("s1", &store, Utc::now()).await.unwrap());
        assert!(registry.get("s1").is_none());
        assert!(store.session("s1").unwrap().ends_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_destroys_flush_once() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();

        store.create_session(&start("s1")).await.unwrap();
        let handle = registry.create_session(start("s1"), Vec::new()).unwrap();

        let ingest = handle.lock_history().await;
        let (first, second) = tokio::join!(
            registry.destroy_session("s1", &store, Utc::now()),
            async {
                drop(ingest);
                registry.destroy_session("s1", &store, Utc::now()).await
            }
        );

        let destroyed = [first.unwrap(), second.unwrap()];
        assert_eq!(destroyed.iter().filter(|d| **d).count(), 1);
        assert!(registry.get("s1").is_none());
    }

    #[test]
    fn samples_are_last_write_wins() {
        let registry = SessionRegistry::new();
        let handle = registry.create_session(start("s1"), Vec::new()).unwrap();

        handle.upsert_sample("u1", sample(0.2));
        handle.upsert_sample("u1", sample(0.9));
        handle.upsert_sample("u2", sample(0.5));

        let scores: Vec<f64> = handle.samples().iter().map(|s| s.engagement_score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);

        assert!(handle.remove_sample("u1"));
        assert_eq!(handle.samples().len(), 1);
    }

    #[test]
    fn caption_snapshot_keeps_most_recent_lines() {
        let registry = SessionRegistry::new();
        let handle = registry.create_session(start("s1"), Vec::new()).unwrap();
        for i in 0..25 {
            handle.push_caption(format!("speaker: line {i}"));
        }

        let snapshot = handle.caption_snapshot(20);
        assert_eq!(snapshot.count, 25);
        assert_eq!(snapshot.recent.len(), 20);
        assert_eq!(snapshot.recent[0], "speaker: line 5");
    }

    #[tokio::test]
    async fn recommendations_only_accumulate_while_active() {
        let registry = SessionRegistry::new();
        let cancel = CancellationToken::new();
        let handle = registry.create_session(start("s1"), Vec::new()).unwrap();

        assert!(handle.push_recommendation("early".to_string()).is_none());

        registry.activate_session("s1", || idle_scheduler(&cancel)).unwrap();
        assert_eq!(handle.push_recommendation("a".to_string()).unwrap(), vec!["a"]);
        assert_eq!(
            handle.push_recommendation("b".to_string()).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
