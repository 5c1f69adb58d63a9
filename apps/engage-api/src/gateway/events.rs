//! Gateway wire-format messages.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};

use crate::error::EngageError;
use crate::models::engagement::{GroupEngagement, ParticipantSample, ParticipantScore};

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// One engagement sample reported by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSample {
    /// Client clock in ms; informational only.
    pub timestamp: f64,
    pub features: Vec<Vec<f64>>,
    pub engagement_score: f64,
}

impl InboundSample {
    /// Decode a text frame. Anything other than a well-formed sample with a
    /// finite score is a `ParseError`.
    pub fn parse(text: &str) -> Result<Self, EngageError> {
        let sample: InboundSample =
            serde_json::from_str(text).map_err(|e| EngageError::Parse(e.to_string()))?;
        if !sample.engagement_score.is_finite() {
            return Err(EngageError::Parse("engagementScore is not finite".to_string()));
        }
        Ok(sample)
    }

    pub fn into_participant(self, username: &str) -> ParticipantSample {
        ParticipantSample {
            username: username.to_string(),
            features: self.features,
            engagement_score: self.engagement_score,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client messages
// ---------------------------------------------------------------------------

/// Full aggregate history of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementPayload {
    pub group_data: Vec<GroupEngagement>,
    pub participant_data: Vec<Vec<ParticipantScore>>,
}

/// A message fanned out to every participant of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "messageType", content = "content")]
pub enum OutboundMessage {
    #[serde(rename = "GROUP_ENGAGEMENT_DATA")]
    GroupEngagementData(EngagementPayload),
    /// Every recommendation so far, newest last.
    #[serde(rename = "RECOMMENDATION")]
    Recommendation(Vec<String>),
}

impl OutboundMessage {
    /// Serialize once so the same frame can be handed to every recipient.
    pub fn encode(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}
