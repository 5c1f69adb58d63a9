use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::sessions;

/// One video-call occurrence as persisted.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub id: String,
    pub channel_id: String,
    pub starts_at: DateTime<Utc>,
    pub initiated_by: String,
    pub ends_at: Option<DateTime<Utc>>,
    pub overall_engagement_score_mean: Option<f64>,
    pub overall_engagement_score_sd: Option<f64>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub id: &'a str,
    pub channel_id: &'a str,
    pub starts_at: DateTime<Utc>,
    pub initiated_by: &'a str,
}

/// Columns written when a call ends. `None` statistics are written as NULL.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = sessions, treat_none_as_null = true)]
pub struct FinishSession<'a> {
    pub ends_at: DateTime<Utc>,
    pub overall_engagement_score_mean: Option<f64>,
    pub overall_engagement_score_sd: Option<f64>,
    pub recommendations: &'a [String],
}

/// Metadata carried by a call-created event.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub id: String,
    pub channel_id: String,
    pub initiated_by: String,
    pub starts_at: DateTime<Utc>,
}

/// Final figures for a session, written once at call end.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub ends_at: DateTime<Utc>,
    /// `None` when the session never produced an aggregate.
    pub overall: Option<engage_common::Aggregate>,
    pub recommendations: Vec<String>,
}
