use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::schema::{group_engagement_data, participant_engagement_data};

/// One mean/SD snapshot of all active participants at one instant.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = group_engagement_data)]
pub struct GroupEngagement {
    pub id: i64,
    pub session_id: String,
    pub ts: DateTime<Utc>,
    pub engagement_score_mean: f64,
    pub engagement_score_sd: f64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = group_engagement_data)]
pub struct NewGroupEngagement<'a> {
    pub session_id: &'a str,
    pub ts: DateTime<Utc>,
    pub engagement_score_mean: f64,
    pub engagement_score_sd: f64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = participant_engagement_data)]
pub struct ParticipantEngagement {
    pub id: i64,
    pub group_engagement_id: i64,
    pub username: String,
    pub engagement_score: f64,
    pub features: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = participant_engagement_data)]
pub struct NewParticipantEngagement<'a> {
    pub group_engagement_id: i64,
    pub username: &'a str,
    pub engagement_score: f64,
    pub features: serde_json::Value,
}

/// The latest sample one connected user reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantSample {
    pub username: String,
    pub features: Vec<Vec<f64>>,
    pub engagement_score: f64,
}

/// Per-participant score inside a group aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantScore {
    pub username: String,
    pub engagement_score: f64,
}

/// A stored group aggregate together with its participant breakdown.
#[derive(Debug, Clone)]
pub struct WindowedEngagement {
    pub record: GroupEngagement,
    pub participants: Vec<ParticipantScore>,
}
