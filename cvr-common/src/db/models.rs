//! Database models
//!
//! A `ConversationResponse` is one interview instance. It is created empty
//! at session start, filled in by the live agent, and finalized exactly
//! once: `finalized_at` is the idempotency marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "Participant",
            Speaker::Assistant => "Interviewer",
            Speaker::System => "System",
        }
    }
}

/// One captured turn, exactly as the live agent recorded it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Speaker,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Speaker, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sent_at: None,
        }
    }
}

/// One normalized turn of the cleaned transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Render turns as `Speaker: text` lines
pub fn render_transcript(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.speaker.label(), turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Derived progress state of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl CompletionStatus {
    /// Status implied by a completion percentage
    ///
    /// `completed` strictly above `complete_threshold`, `not_started` at 0.
    pub fn classify(percentage: u8, complete_threshold: u8) -> Self {
        if percentage == 0 {
            CompletionStatus::NotStarted
        } else if percentage > complete_threshold {
            CompletionStatus::Completed
        } else {
            CompletionStatus::InProgress
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::NotStarted => "not_started",
            CompletionStatus::InProgress => "in_progress",
            CompletionStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "not_started" => Ok(CompletionStatus::NotStarted),
            "in_progress" => Ok(CompletionStatus::InProgress),
            "completed" => Ok(CompletionStatus::Completed),
            other => Err(crate::Error::Internal(format!(
                "Unknown completion status: {}",
                other
            ))),
        }
    }
}

/// One finalized-or-finalizing interview instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: String,
    /// User whose plan quota this response counts against
    pub owner_id: String,
    pub interview_type: String,
    /// Objective/turn-budget plan text the live agent followed
    pub conversation_plan: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub raw_messages: Vec<ChatMessage>,
    pub clean_transcript: Option<Vec<TranscriptTurn>>,
    pub completion_status: CompletionStatus,
    pub completion_percentage: u8,
    /// Progress the live agent last reported, if any
    pub agent_progress: Option<f64>,
    pub user_word_count: i64,
    pub summary: Option<Value>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl ConversationResponse {
    /// Fresh, empty response as created at session start
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            interview_type: String::new(),
            conversation_plan: String::new(),
            start_time: Some(start_time),
            end_time: None,
            duration_minutes: None,
            raw_messages: Vec::new(),
            clean_transcript: None,
            completion_status: CompletionStatus::NotStarted,
            completion_percentage: 0,
            agent_progress: None,
            user_word_count: 0,
            summary: None,
            finalized_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    /// Set percentage and status together; they are never set apart
    pub fn apply_completion(&mut self, percentage: u8, complete_threshold: u8) {
        let percentage = percentage.min(100);
        self.completion_percentage = percentage;
        self.completion_status = CompletionStatus::classify(percentage, complete_threshold);
    }
}

/// Quota counters for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub user_id: String,
    pub responses_used: i64,
    pub minutes_used: i64,
    pub response_quota: i64,
    pub minute_quota: i64,
}

/// One billable finalization event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub response_id: String,
    pub user_id: String,
    pub minutes: i64,
}
