//! Instructions and prompt bodies sent to the text oracle.

use std::collections::BTreeMap;

use serde::Serialize;

/// Caption lines fed to the summarizer on each pass.
pub const RECENT_CAPTION_LIMIT: usize = 20;

/// Used in place of a discussion summary when summarization fails.
pub const SUMMARY_FALLBACK: &str = "Unable to summarize discussion at this time.";

/// Used in place of a recommendation when the oracle fails.
pub const RECOMMENDATION_FALLBACK: &str =
    "Unable to generate recommendation, please try again later.";

pub const SUMMARY_INSTRUCTION: &str = "\
You summarize transcripts of live group conversations.

Rules:
- Write 1-2 complete, concise, human-readable sentences.
- Describe only what the group as a whole is discussing.
- Never name or single out usernames or individuals.
- Use only the transcript provided. Do not invent content.";

pub const RECOMMENDATION_INSTRUCTION: &str = "\
You are an analyst of real-time engagement in group video calls.

Your job:
- Assess the engagement trend from the group-level statistics (average score, standard deviation, trend).
- Let the recent discussion context shape the tone and relevance of your advice.
- Say whether engagement is high, moderate, low, or fluctuating.
- Suggest a concise, professional strategy the whole group can use to raise or keep engagement.
- Never mention or analyze individual participants.
- Bucket engagement scores as:
  - 0.00 - 0.50 = Low
  - 0.51 - 0.80 = Medium
  - 0.81 - 1.00 = High
- Reply with a single human-readable sentence.
- Do not assume or generate additional data.";

/// Coarse engagement band of a score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

impl EngagementLevel {
    pub fn from_score(score: f64) -> Self {
        if score <= 0.50 {
            Self::Low
        } else if score <= 0.80 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// Group-level statistics over one recommendation window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    /// Largest participant count seen in any single record of the window.
    pub number_of_participants: usize,
    pub average_engagement_score: f64,
    #[serde(rename = "averageEngagementSD")]
    pub average_engagement_sd: f64,
    pub group_engagement_trend: Vec<f64>,
    pub engagement_level: EngagementLevel,
    /// Per-username scores in window order. Kept out of the prompt.
    #[serde(skip)]
    pub participant_series: BTreeMap<String, Vec<f64>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationData<'a> {
    group_data: &'a WindowStats,
    discussion_context: &'a str,
}

/// Flatten the last caption lines into one quoted-safe line.
pub fn transcript(lines: &[String]) -> String {
    lines
        .join(" ")
        .replace(['\n', '\r'], " ")
        .replace('"', "\\\"")
        .trim()
        .to_string()
}

pub fn summary_prompt(transcript: &str) -> String {
    format!("Summarize this group conversation:\n\n\"{transcript}\"")
}

pub fn recommendation_prompt(
    stats: &WindowStats,
    discussion_context: &str,
) -> Result<String, serde_json::Error> {
    let data = serde_json::to_string_pretty(&RecommendationData {
        group_data: stats,
        discussion_context,
    })?;

    Ok(format!(
        "Analyze the group engagement data from the past minute together with the recent \
discussion context. Judge engagement from the group-level statistics only and give one \
concise group-level recommendation. Use the discussion context to make it relevant.

Schema:
- numberOfParticipants: participants in the call
- averageEngagementScore: mean score across participants
- averageEngagementSD: standard deviation of engagement scores
- groupEngagementTrend: mean score of each aggregate over time
- engagementLevel: Low, Medium or High band of averageEngagementScore
- discussionContext: summary of the live closed captions (topic only)

Data:
{data}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> WindowStats {
        WindowStats {
            number_of_participants: 3,
            average_engagement_score: 0.7,
            average_engagement_sd: 0.1,
            group_engagement_trend: vec![0.6, 0.8],
            engagement_level: EngagementLevel::Medium,
            participant_series: BTreeMap::from([("alice".to_string(), vec![0.6, 0.8])]),
        }
    }

    #[test]
    fn levels_follow_score_bands() {
        assert_eq!(EngagementLevel::from_score(0.0), EngagementLevel::Low);
        assert_eq!(EngagementLevel::from_score(0.50), EngagementLevel::Low);
        assert_eq!(EngagementLevel::from_score(0.51), EngagementLevel::Medium);
        assert_eq!(EngagementLevel::from_score(0.80), EngagementLevel::Medium);
        assert_eq!(EngagementLevel::from_score(0.81), EngagementLevel::High);
        assert_eq!(EngagementLevel::from_score(1.0), EngagementLevel::High);
    }

    #[test]
    fn transcript_flattens_and_escapes() {
        let lines = vec![
            "ann: we said \"ship it\"".to_string(),
            "bo: ok\nnext".to_string(),
        ];
        assert_eq!(transcript(&lines), "ann: we said \\\"ship it\\\" bo: ok next");
        assert_eq!(transcript(&[]), "");
        assert_eq!(transcript(&["  ".to_string()]), "");
    }

    #[test]
    fn recommendation_prompt_carries_group_data_only() {
        let prompt = recommendation_prompt(&stats(), "Sprint planning.").unwrap();
        assert!(prompt.contains("\"numberOfParticipants\": 3"));
        assert!(prompt.contains("\"averageEngagementSD\": 0.1"));
        assert!(prompt.contains("\"engagementLevel\": \"Medium\""));
        assert!(prompt.contains("\"discussionContext\": \"Sprint planning.\""));
        assert!(!prompt.contains("alice"));
    }

    #[test]
    fn summary_prompt_quotes_transcript() {
        assert_eq!(
            summary_prompt("a: hi"),
            "Summarize this group conversation:\n\n\"a: hi\""
        );
    }
}
