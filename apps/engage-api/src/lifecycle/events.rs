//! Call-lifecycle webhook payloads.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::EngageError;

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallCustom {
    #[serde(rename = "channelId", default)]
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallInfo {
    pub created_by: UserRef,
    #[serde(default)]
    pub custom: CallCustom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallMember {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallCreated {
    pub call_cid: String,
    pub created_at: DateTime<Utc>,
    pub call: CallInfo,
    #[serde(default)]
    pub members: Vec<CallMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallRef {
    pub call_cid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallEnded {
    pub call_cid: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptionSpeaker {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClosedCaption {
    pub text: String,
    #[serde(default)]
    pub user: CaptionSpeaker,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallClosedCaption {
    pub call_cid: String,
    pub closed_caption: ClosedCaption,
}

impl CallClosedCaption {
    /// `"speaker: text"`, preferring the display name over the user id.
    pub fn line(&self) -> String {
        let speaker = self
            .closed_caption
            .user
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.closed_caption.user.id.as_deref())
            .unwrap_or("unknown");
        format!("{speaker}: {}", self.closed_caption.text)
    }
}

/// Events the coordinator acts on. Everything else decodes to `Unhandled`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CallEvent {
    #[serde(rename = "call.created")]
    Created(CallCreated),
    #[serde(rename = "call.session_started")]
    SessionStarted(CallRef),
    #[serde(rename = "call.session_ended")]
    SessionEnded(CallRef),
    #[serde(rename = "call.ended")]
    Ended(CallEnded),
    #[serde(rename = "call.closed_caption")]
    ClosedCaption(CallClosedCaption),
    #[serde(other)]
    Unhandled,
}

/// A decoded webhook body plus its raw `type` tag.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: String,
    pub event: CallEvent,
}

impl WebhookEvent {
    pub fn decode(body: &[u8]) -> Result<Self, EngageError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| EngageError::Parse(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EngageError::Parse("event has no type".to_string()))?
            .to_string();
        let event = serde_json::from_value(value).map_err(|e| EngageError::Parse(e.to_string()))?;
        Ok(Self { kind, event })
    }
}

/// Session id is the part of a call cid after the call type: `default:abc` → `abc`.
pub fn session_id_from_cid(call_cid: &str) -> &str {
    call_cid
        .split_once(':')
        .map_or(call_cid, |(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_call_type_from_cid() {
        assert_eq!(session_id_from_cid("default:abc123"), "abc123");
        assert_eq!(session_id_from_cid("abc123"), "abc123");
    }

    #[test]
    fn decodes_call_created() {
        let body = serde_json::json!({
            "type": "call.created",
            "call_cid": "default:s1",
            "created_at": "2026-10-16T10:00:00Z",
            "call": { "created_by": { "id": "u1" }, "custom": { "channelId": "ch1" } },
            "members": [{ "user_id": "u1" }, { "user_id": "u2" }]
        });
        let decoded = WebhookEvent::decode(body.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.kind, "call.created");
        let CallEvent::Created(created) = decoded.event else {
            panic!("expected call.created");
        };
        assert_eq!(created.call.created_by.id, "u1");
        assert_eq!(created.call.custom.channel_id, "ch1");
        assert_eq!(created.members.len(), 2);
    }

    #[test]
    fn caption_line_prefers_name() {
        let body = serde_json::json!({
            "type": "call.closed_caption",
            "call_cid": "default:s1",
            "closed_caption": { "text": "hello all", "user": { "id": "u1", "name": "Ann" } }
        });
        let CallEvent::ClosedCaption(caption) =
            WebhookEvent::decode(body.to_string().as_bytes()).unwrap().event
        else {
            panic!("expected caption");
        };
        assert_eq!(caption.line(), "Ann: hello all");
    }

    #[test]
    fn unknown_type_is_unhandled() {
        let decoded =
            WebhookEvent::decode(br#"{"type":"call.member_added","call_cid":"default:s1"}"#).unwrap();
        assert_eq!(decoded.kind, "call.member_added");
        assert!(matches!(decoded.event, CallEvent::Unhandled));
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(WebhookEvent::decode(b"nope"), Err(EngageError::Parse(_))));
        assert!(matches!(WebhookEvent::decode(b"{}"), Err(EngageError::Parse(_))));
        assert!(matches!(
            WebhookEvent::decode(br#"{"type":"call.ended","call_cid":"default:s1"}"#),
            Err(EngageError::Parse(_))
        ));
    }
}
