//! Retrying structured extraction
//!
//! `ExtractionStage::attempt` never fails: it returns the extracted JSON
//! object, or `None` when extraction is unavailable (blank transcript, or
//! every attempt failed). Failed calls, timeouts and unparseable replies
//! all count against the same attempt budget.
//!
//! **Backoff:** linear. The wait before retry `n` (1-based) is
//! `n × retry_delay`.

use cvr_common::config::{LlmConfig, MAX_LLM_RETRIES};
use cvr_common::db::CompletionStatus;
use cvr_common::time::millis_to_duration;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::llm_client::{LlmClient, LlmError};

/// Why a single attempt failed
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("model call failed: {0}")]
    Call(#[from] LlmError),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("reply is not valid JSON: {0}")]
    Parse(String),

    #[error("reply is JSON but not an object")]
    NotAnObject,
}

/// Attempt budget and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Backoff unit
    pub retry_delay: Duration,
    /// Caller-enforced limit on each model call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries.min(MAX_LLM_RETRIES),
            retry_delay: millis_to_duration(config.retry_delay_ms),
            call_timeout: millis_to_duration(config.timeout_ms),
        }
    }
}

/// Everything the extraction prompt is rendered from
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub response_id: String,
    pub interview_type: String,
    pub completion_status: CompletionStatus,
    pub completion_percentage: u8,
    pub transcript: String,
    pub conversation_plan: String,
}

/// Bounded-retry wrapper around the extraction model call
pub struct ExtractionStage {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl ExtractionStage {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Run extraction with retries; `None` means "extraction unavailable"
    pub async fn attempt(&self, input: &ExtractionInput) -> Option<Value> {
        if input.transcript.trim().is_empty() {
            tracing::info!(
                response_id = %input.response_id,
                "Transcript is empty, skipping extraction"
            );
            return None;
        }

        let prompt = render_prompt(input);
        let total_attempts = self.policy.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 0..total_attempts {
            if attempt > 0 {
                let backoff = self.policy.retry_delay.saturating_mul(attempt);
                tracing::debug!(
                    response_id = %input.response_id,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying extraction after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.call_once(&prompt).await {
                Ok(extracted) => {
                    if attempt > 0 {
                        tracing::info!(
                            response_id = %input.response_id,
                            attempt = attempt + 1,
                            "Extraction succeeded after retry"
                        );
                    }
                    return Some(extracted);
                }
                Err(err) => {
                    tracing::warn!(
                        response_id = %input.response_id,
                        attempt = attempt + 1,
                        total_attempts,
                        error = %err,
                        "Extraction attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        tracing::error!(
            response_id = %input.response_id,
            total_attempts,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "Extraction unavailable: attempt budget exhausted"
        );
        None
    }

    async fn call_once(&self, prompt: &str) -> Result<Value, ExtractionError> {
        let reply = tokio::time::timeout(self.policy.call_timeout, self.client.complete(prompt))
            .await
            .map_err(|_| ExtractionError::Timeout(self.policy.call_timeout))??;
        parse_extraction(&reply)
    }
}

/// Strip code-fence wrapping and parse a JSON object
pub fn parse_extraction(reply: &str) -> Result<Value, ExtractionError> {
    let cleaned = strip_code_fences(reply);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| ExtractionError::Parse(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ExtractionError::NotAnObject)
    }
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if present
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop an info string such as `json` up to the end of the fence line
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        rest.strip_prefix('\n').unwrap_or(rest)
    } else {
        trimmed
    };
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Render the extraction prompt
pub fn render_prompt(input: &ExtractionInput) -> String {
    let plan = if input.conversation_plan.trim().is_empty() {
        "(no conversation plan recorded)"
    } else {
        input.conversation_plan.trim()
    };

    format!(
        "Interview type: {interview_type}\n\
         Completion: {status} ({percentage}% of the conversation plan covered)\n\
         \n\
         Conversation plan:\n{plan}\n\
         \n\
         Transcript:\n{transcript}\n\
         \n\
         Summarize what the participant said and extract the findings for each \
         objective in the plan. Only use what the participant actually said; \
         for a partial interview, mark objectives that were not reached as \
         not covered. Respond with a JSON object with the keys \"summary\" \
         (string), \"key_findings\" (array of strings), \"objectives\" (array \
         of objects with \"objective\", \"covered\" and \"findings\"), and \
         \"sentiment\" (one of \"positive\", \"neutral\", \"negative\", \"mixed\").",
        interview_type = input.interview_type,
        status = input.completion_status.as_str(),
        percentage = input.completion_percentage,
        plan = plan,
        transcript = input.transcript,
    )
}
