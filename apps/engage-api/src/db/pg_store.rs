//! Postgres-backed `EngagementStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::AsyncConnection;
use scoped_futures::ScopedFutureExt;

use engage_common::Aggregate;

use crate::db::pool::DbPool;
use crate::db::schema::{group_engagement_data, participant_engagement_data, sessions};
use crate::db::store::EngagementStore;
use crate::error::EngageError;
use crate::models::engagement::{
    GroupEngagement, NewGroupEngagement, NewParticipantEngagement, ParticipantEngagement,
    ParticipantSample, ParticipantScore, WindowedEngagement,
};
use crate::models::session::{FinishSession, NewSession, SessionStart, SessionSummary};

pub struct PgStore {
    db: DbPool,
}

impl PgStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EngagementStore for PgStore {
    async fn create_session(&self, session: &SessionStart) -> Result<(), EngageError> {
        let mut conn = self.db.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(sessions::table).values(NewSession {
                id: &session.id,
                channel_id: &session.channel_id,
                starts_at: session.starts_at,
                initiated_by: &session.initiated_by,
            }),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn record_group_engagement(
        &self,
        session_id: &str,
        ts: DateTime<Utc>,
        aggregate: Aggregate,
        participants: &[ParticipantSample],
    ) -> Result<GroupEngagement, EngageError> {
        let mut conn = self.db.get().await?;

        conn.transaction::<_, EngageError, _>(|conn| {
            async move {
                // 1. Insert the group aggregate and take its generated id.
                let record: GroupEngagement = diesel_async::RunQueryDsl::get_result(
                    diesel::insert_into(group_engagement_data::table)
                        .values(NewGroupEngagement {
                            session_id,
                            ts,
                            engagement_score_mean: aggregate.mean,
                            engagement_score_sd: aggregate.sd,
                        })
                        .returning(GroupEngagement::as_returning()),
                    conn,
                )
                .await?;

                // 2. One breakdown row per participant, referencing it.
                let rows: Vec<NewParticipantEngagement<'_>> = participants
                    .iter()
                    .map(|p| NewParticipantEngagement {
                        group_engagement_id: record.id,
                        username: &p.username,
                        engagement_score: p.engagement_score,
                        features: serde_json::json!(p.features),
                    })
                    .collect();

                if !rows.is_empty() {
                    diesel_async::RunQueryDsl::execute(
                        diesel::insert_into(participant_engagement_data::table).values(&rows),
                        conn,
                    )
                    .await?;
                }

                Ok(record)
            }
            .scope_boxed()
        })
        .await
    }

    async fn group_engagements(&self, session_id: &str) -> Result<Vec<GroupEngagement>, EngageError> {
        let mut conn = self.db.get().await?;
        let rows = diesel_async::RunQueryDsl::load(
            group_engagement_data::table
                .filter(group_engagement_data::session_id.eq(session_id))
                .order((group_engagement_data::ts.asc(), group_engagement_data::id.asc()))
                .select(GroupEngagement::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rows)
    }

    async fn group_engagements_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WindowedEngagement>, EngageError> {
        let mut conn = self.db.get().await?;

        let records: Vec<GroupEngagement> = diesel_async::RunQueryDsl::load(
            group_engagement_data::table
                .filter(group_engagement_data::session_id.eq(session_id))
                .filter(group_engagement_data::ts.ge(since))
                .order((group_engagement_data::ts.asc(), group_engagement_data::id.asc()))
                .select(GroupEngagement::as_select()),
            &mut conn,
        )
        .await?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let breakdown: Vec<ParticipantEngagement> = diesel_async::RunQueryDsl::load(
            participant_engagement_data::table
                .filter(participant_engagement_data::group_engagement_id.eq_any(&ids))
                .order(participant_engagement_data::id.asc())
                .select(ParticipantEngagement::as_select()),
            &mut conn,
        )
        .await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let participants = breakdown
                    .iter()
                    .filter(|p| p.group_engagement_id == record.id)
                    .map(|p| ParticipantScore {
                        username: p.username.clone(),
                        engagement_score: p.engagement_score,
                    })
                    .collect();
                WindowedEngagement {
                    record,
                    participants,
                }
            })
            .collect())
    }

    async fn finish_session(
        &self,
        session_id: &str,
        summary: &SessionSummary,
    ) -> Result<(), EngageError> {
        let mut conn = self.db.get().await?;
        let updated = diesel_async::RunQueryDsl::execute(
            diesel::update(sessions::table.find(session_id)).set(FinishSession {
                ends_at: summary.ends_at,
                overall_engagement_score_mean: summary.overall.map(|a| a.mean),
                overall_engagement_score_sd: summary.overall.map(|a| a.sd),
                recommendations: &summary.recommendations,
            }),
            &mut conn,
        )
        .await?;

        if updated == 0 {
            return Err(EngageError::Persistence(format!("no session row {session_id}")));
        }
        Ok(())
    }
}
