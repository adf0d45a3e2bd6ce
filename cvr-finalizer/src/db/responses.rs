//! Conversation response persistence

use cvr_common::db::{ChatMessage, CompletionStatus, ConversationResponse, TranscriptTurn};
use cvr_common::time::parse_rfc3339;
use cvr_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Insert a response as the live agent would have left it
pub async fn insert_response(pool: &SqlitePool, response: &ConversationResponse) -> Result<()> {
    let raw_messages = serde_json::to_string(&response.raw_messages)?;
    let clean_transcript = response
        .clean_transcript
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let summary = response.summary.as_ref().map(|v| v.to_string());

    sqlx::query(
        r#"
        INSERT INTO conversation_responses (
            id, owner_id, interview_type, conversation_plan,
            start_time, end_time, duration_minutes,
            raw_messages, clean_transcript,
            completion_status, completion_percentage, agent_progress,
            user_word_count, summary, finalized_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&response.id)
    .bind(&response.owner_id)
    .bind(&response.interview_type)
    .bind(&response.conversation_plan)
    .bind(response.start_time.map(|dt| dt.to_rfc3339()))
    .bind(response.end_time.map(|dt| dt.to_rfc3339()))
    .bind(response.duration_minutes)
    .bind(raw_messages)
    .bind(clean_transcript)
    .bind(response.completion_status.as_str())
    .bind(response.completion_percentage as i64)
    .bind(response.agent_progress)
    .bind(response.user_word_count)
    .bind(summary)
    .bind(response.finalized_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one response
pub async fn load_response(pool: &SqlitePool, id: &str) -> Result<Option<ConversationResponse>> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, interview_type, conversation_plan,
               start_time, end_time, duration_minutes,
               raw_messages, clean_transcript,
               completion_status, completion_percentage, agent_progress,
               user_word_count, summary, finalized_at
        FROM conversation_responses
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let raw_messages: String = row.get("raw_messages");
    let raw_messages: Vec<ChatMessage> =
        serde_json::from_str(&raw_messages).map_err(corrupt(id, "raw_messages"))?;

    let clean_transcript: Option<String> = row.get("clean_transcript");
    let clean_transcript: Option<Vec<TranscriptTurn>> = clean_transcript
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(corrupt(id, "clean_transcript"))?;

    let summary: Option<String> = row.get("summary");
    let summary = summary
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(corrupt(id, "summary"))?;

    let status: String = row.get("completion_status");
    let percentage: i64 = row.get("completion_percentage");

    Ok(Some(ConversationResponse {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        interview_type: row.get("interview_type"),
        conversation_plan: row.get("conversation_plan"),
        start_time: optional_timestamp(row.get("start_time"))?,
        end_time: optional_timestamp(row.get("end_time"))?,
        duration_minutes: row.get("duration_minutes"),
        raw_messages,
        clean_transcript,
        completion_status: CompletionStatus::parse(&status)?,
        completion_percentage: percentage.clamp(0, 100) as u8,
        agent_progress: row.get("agent_progress"),
        user_word_count: row.get("user_word_count"),
        summary,
        finalized_at: optional_timestamp(row.get("finalized_at"))?,
    }))
}

/// Persist derived fields and mark finalized, only if not finalized yet
pub async fn save_finalized(pool: &SqlitePool, response: &ConversationResponse) -> Result<bool> {
    let finalized_at = response
        .finalized_at
        .ok_or_else(|| Error::InvalidInput("finalized_at must be set before saving".to_string()))?;
    let clean_transcript = response
        .clean_transcript
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let summary = response.summary.as_ref().map(|v| v.to_string());

    let result = sqlx::query(
        r#"
        UPDATE conversation_responses SET
            end_time = ?,
            duration_minutes = ?,
            clean_transcript = ?,
            completion_status = ?,
            completion_percentage = ?,
            user_word_count = ?,
            summary = ?,
            finalized_at = ?
        WHERE id = ? AND finalized_at IS NULL
        "#,
    )
    .bind(response.end_time.map(|dt| dt.to_rfc3339()))
    .bind(response.duration_minutes)
    .bind(clean_transcript)
    .bind(response.completion_status.as_str())
    .bind(response.completion_percentage as i64)
    .bind(response.user_word_count)
    .bind(summary)
    .bind(finalized_at.to_rfc3339())
    .bind(&response.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn optional_timestamp(value: Option<String>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    value.as_deref().map(parse_rfc3339).transpose()
}

fn corrupt<'a>(id: &'a str, column: &'static str) -> impl FnOnce(serde_json::Error) -> Error + 'a {
    move |source| Error::CorruptRecord {
        id: id.to_string(),
        column,
        source,
    }
}
