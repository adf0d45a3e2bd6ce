//! Conversation finalization pipeline
//!
//! Transforms one ended conversation response into its finalized form,
//! exactly once. Stages run strictly in order:
//!
//! 1. Timing: set `end_time` (now, unless already set) and duration
//! 2. Cleaning: raw messages → cleaned transcript
//! 3. Completion: percentage and status
//! 4. Word counting: participant words only
//! 5. Usage accounting (enrichment, > usage threshold)
//! 6. Extraction/summary (enrichment, > 0%)
//! 7. Persist derived fields and set `finalized_at`
//!
//! Stages 1-4 are structural: a failure aborts the run and nothing is
//! written, so the response stays eligible for a later retry. Stages 5-6
//! are enrichments: failures are logged and the run continues. Stage 7 is
//! last so that a crash anywhere earlier leaves an unmarked record that is
//! safe to re-run.

use chrono::{DateTime, Utc};
use cvr_common::db::{render_transcript, CompletionStatus};
use cvr_common::time::{billable_minutes, now};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::completion::CompletionEstimator;
use super::extraction::{ExtractionInput, ExtractionStage};
use super::transcript::{count_user_words, TranscriptCleaner};
use super::usage_accountant::{UsageAccountant, UsageStatus};
use crate::db::ResponseStore;

/// Pipeline stage identifiers (for logs and errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Timing,
    Cleaning,
    Completion,
    WordCount,
    Usage,
    Extraction,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Timing => "timing",
            Stage::Cleaning => "cleaning",
            Stage::Completion => "completion",
            Stage::WordCount => "word_count",
            Stage::Usage => "usage",
            Stage::Extraction => "extraction",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Fatal pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("conversation response not found: {0}")]
    NotFound(String),

    #[error("{stage} stage failed for {response_id}: {message}")]
    Stage {
        stage: Stage,
        response_id: String,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] cvr_common::Error),
}

/// Whether extraction ran and produced anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Completion was 0%; extraction not attempted
    Skipped,
    Generated,
    /// Attempted, but the stage reported "unavailable"
    Unavailable,
}

/// Result of one completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizationReport {
    pub id: String,
    pub completion_status: CompletionStatus,
    pub completion_percentage: u8,
    pub duration_minutes: i64,
    pub user_word_count: i64,
    pub usage: UsageStatus,
    pub summary: SummaryStatus,
    pub finalized_at: DateTime<Utc>,
}

/// Outcome of `FinalizationPipeline::run`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Finalized(FinalizationReport),
    AlreadyFinalized {
        id: String,
        finalized_at: Option<DateTime<Utc>>,
    },
}

pub struct FinalizationPipeline {
    store: Arc<dyn ResponseStore>,
    cleaner: Arc<dyn TranscriptCleaner>,
    estimator: Arc<dyn CompletionEstimator>,
    accountant: UsageAccountant,
    extraction: ExtractionStage,
    complete_threshold_percent: u8,
}

impl FinalizationPipeline {
    pub fn new(
        store: Arc<dyn ResponseStore>,
        cleaner: Arc<dyn TranscriptCleaner>,
        estimator: Arc<dyn CompletionEstimator>,
        accountant: UsageAccountant,
        extraction: ExtractionStage,
        complete_threshold_percent: u8,
    ) -> Self {
        Self {
            store,
            cleaner,
            estimator,
            accountant,
            extraction,
            complete_threshold_percent,
        }
    }

    /// Finalize response `id`; a no-op if it is already finalized
    pub async fn run(&self, id: &str) -> Result<FinalizeOutcome, PipelineError> {
        let mut response = self
            .store
            .load_response(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;

        if let Some(finalized_at) = response.finalized_at {
            tracing::info!(response_id = %id, %finalized_at, "Response already finalized, skipping");
            return Ok(FinalizeOutcome::AlreadyFinalized {
                id: id.to_string(),
                finalized_at: Some(finalized_at),
            });
        }

        tracing::info!(response_id = %id, user_id = %response.owner_id, "Finalizing response");

        // Stage 1: timing
        let started = response.start_time.ok_or_else(|| PipelineError::Stage {
            stage: Stage::Timing,
            response_id: id.to_string(),
            message: "start_time is not set".to_string(),
        })?;
        let ended = *response.end_time.get_or_insert_with(now);
        let duration_minutes = billable_minutes(started, ended);
        response.duration_minutes = Some(duration_minutes);
        tracing::debug!(response_id = %id, stage = %Stage::Timing, duration_minutes, "Stage complete");

        // Stage 2: transcript cleaning
        let transcript = self
            .cleaner
            .clean(&response.raw_messages)
            .map_err(|e| stage_error(Stage::Cleaning, id, e))?;
        tracing::debug!(response_id = %id, stage = %Stage::Cleaning, turns = transcript.len(), "Stage complete");

        // Stage 3: completion
        let percentage = self
            .estimator
            .estimate(&response, &transcript)
            .map_err(|e| stage_error(Stage::Completion, id, e))?;
        if percentage > 100 {
            return Err(PipelineError::Stage {
                stage: Stage::Completion,
                response_id: id.to_string(),
                message: format!("completion percentage out of range: {}", percentage),
            });
        }
        response.apply_completion(percentage, self.complete_threshold_percent);
        tracing::debug!(
            response_id = %id,
            stage = %Stage::Completion,
            completion_percentage = percentage,
            status = response.completion_status.as_str(),
            "Stage complete"
        );

        // Stage 4: word count
        response.user_word_count = count_user_words(&transcript);
        tracing::debug!(response_id = %id, stage = %Stage::WordCount, words = response.user_word_count, "Stage complete");

        // Stage 5: usage accounting (enrichment)
        let usage = match self.accountant.account_if_eligible(&response).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    response_id = %id,
                    stage = %Stage::Usage,
                    error = %e,
                    "Usage accounting failed, continuing finalization"
                );
                UsageStatus::Failed
            }
        };

        // Stage 6: extraction (enrichment)
        let rendered = render_transcript(&transcript);
        response.clean_transcript = Some(transcript);
        let summary = if response.completion_percentage > 0 {
            let input = ExtractionInput {
                response_id: id.to_string(),
                interview_type: response.interview_type.clone(),
                completion_status: response.completion_status,
                completion_percentage: response.completion_percentage,
                transcript: rendered,
                conversation_plan: response.conversation_plan.clone(),
            };
            match self.extraction.attempt(&input).await {
                Some(extracted) => {
                    response.summary = Some(extracted);
                    SummaryStatus::Generated
                }
                None => {
                    tracing::warn!(
                        response_id = %id,
                        stage = %Stage::Extraction,
                        "Extraction unavailable, finalizing without summary"
                    );
                    SummaryStatus::Unavailable
                }
            }
        } else {
            tracing::debug!(response_id = %id, stage = %Stage::Extraction, "Completion is 0%, skipping extraction");
            SummaryStatus::Skipped
        };

        // Stage 7: persist and mark finalized
        let finalized_at = now();
        response.finalized_at = Some(finalized_at);
        let written = self.store.save_finalized(&response).await?;
        if !written {
            tracing::warn!(
                response_id = %id,
                "Response was finalized concurrently; keeping the earlier result"
            );
            let current = self.store.load_response(id).await?;
            return Ok(FinalizeOutcome::AlreadyFinalized {
                id: id.to_string(),
                finalized_at: current.and_then(|r| r.finalized_at),
            });
        }

        let report = FinalizationReport {
            id: id.to_string(),
            completion_status: response.completion_status,
            completion_percentage: response.completion_percentage,
            duration_minutes,
            user_word_count: response.user_word_count,
            usage,
            summary,
            finalized_at,
        };

        tracing::info!(
            response_id = %id,
            completion_percentage = report.completion_percentage,
            status = report.completion_status.as_str(),
            usage = ?report.usage,
            summary = ?report.summary,
            "Response finalized"
        );

        Ok(FinalizeOutcome::Finalized(report))
    }
}

fn stage_error(stage: Stage, response_id: &str, err: anyhow::Error) -> PipelineError {
    PipelineError::Stage {
        stage,
        response_id: response_id.to_string(),
        message: format!("{:#}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{responses, usage, SqliteStore};
    use crate::services::completion::ReportedProgressEstimator;
    use crate::services::extraction::RetryPolicy;
    use crate::services::llm_client::{LlmClient, LlmError};
    use crate::services::transcript::StandardCleaner;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use cvr_common::db::{init_memory_database, ChatMessage, ConversationResponse, Speaker};
    use cvr_common::KeyedMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Always answers with the same reply (or the same failure)
    struct FixedClient {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .ok_or_else(|| LlmError::NetworkError("unreachable".to_string()))
        }
    }

    struct Harness {
        pipeline: FinalizationPipeline,
        store: SqliteStore,
        client: Arc<FixedClient>,
    }

    /// Fails every estimate, as a broken completion model would
    struct FailingEstimator;

    impl CompletionEstimator for FailingEstimator {
        fn estimate(
            &self,
            _response: &ConversationResponse,
            _transcript: &[cvr_common::db::TranscriptTurn],
        ) -> anyhow::Result<u8> {
            anyhow::bail!("objective state unreadable")
        }
    }

    async fn harness(reply: Option<&'static str>) -> Harness {
        harness_with(reply, Arc::new(ReportedProgressEstimator)).await
    }

    async fn harness_with(
        reply: Option<&'static str>,
        estimator: Arc<dyn CompletionEstimator>,
    ) -> Harness {
        let pool = init_memory_database().await.unwrap();
        usage::insert_profile(&pool, "u1", 100, 1000).await.unwrap();
        let store = SqliteStore::new(pool);
        let shared: Arc<dyn ResponseStore> = Arc::new(store.clone());
        let client = Arc::new(FixedClient {
            reply,
            calls: AtomicUsize::new(0),
        });
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            call_timeout: Duration::from_millis(200),
        };
        let pipeline = FinalizationPipeline::new(
            Arc::clone(&shared),
            Arc::new(StandardCleaner),
            estimator,
            UsageAccountant::new(shared, Arc::new(KeyedMutex::new()), 50),
            ExtractionStage::new(client.clone(), policy),
            50,
        );
        Harness {
            pipeline,
            store,
            client,
        }
    }

    async fn seed(store: &SqliteStore, id: &str, owner: &str, progress: Option<f64>) {
        let mut response = ConversationResponse::new(id, owner, now() - ChronoDuration::minutes(12));
        response.interview_type = "discovery".to_string();
        response.conversation_plan = "1. Habits\n2. Pain points".to_string();
        response.raw_messages = vec![
            ChatMessage::new(Speaker::System, "You are an interviewer."),
            ChatMessage::new(Speaker::Assistant, "How do you plan your week?"),
            ChatMessage::new(Speaker::User, "Mostly on  Sunday evenings"),
            ChatMessage::new(Speaker::User, "with a paper notebook"),
        ];
        response.agent_progress = progress;
        responses::insert_response(store.pool(), &response).await.unwrap();
    }

    fn finalized(outcome: FinalizeOutcome) -> FinalizationReport {
        match outcome {
            FinalizeOutcome::Finalized(report) => report,
            other => panic!("expected a finalized outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_finalizes_completed_response() {
        let h = harness(Some(r#"{"summary": "Plans weekly on paper"}"#)).await;
        seed(&h.store, "r1", "u1", Some(80.0)).await;

        let report = finalized(h.pipeline.run("r1").await.unwrap());
        assert_eq!(report.completion_status, CompletionStatus::Completed);
        assert_eq!(report.completion_percentage, 80);
        assert_eq!(report.user_word_count, 8);
        assert_eq!(report.usage, UsageStatus::Recorded);
        assert_eq!(report.summary, SummaryStatus::Generated);
        assert!(report.duration_minutes >= 12);

        let stored = h.store.load_response("r1").await.unwrap().unwrap();
        assert!(stored.is_finalized());
        assert!(stored.end_time.is_some());
        assert_eq!(stored.summary.unwrap()["summary"], "Plans weekly on paper");
        let transcript = stored.clean_transcript.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].text, "Mostly on Sunday evenings with a paper notebook");

        let counters = h.store.load_usage("u1").await.unwrap().unwrap();
        assert_eq!(counters.responses_used, 1);
        assert_eq!(counters.minutes_used, report.duration_minutes);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let h = harness(Some(r#"{"summary": "ok"}"#)).await;
        seed(&h.store, "r1", "u1", Some(80.0)).await;

        let first = finalized(h.pipeline.run("r1").await.unwrap());
        let calls_after_first = h.client.calls.load(Ordering::SeqCst);

        match h.pipeline.run("r1").await.unwrap() {
            FinalizeOutcome::AlreadyFinalized { finalized_at, .. } => {
                assert_eq!(finalized_at, Some(first.finalized_at));
            }
            other => panic!("expected already finalized, got {:?}", other),
        }

        assert_eq!(h.client.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(usage::count_usage_events(h.store.pool(), "u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_half_complete_is_in_progress_and_unbilled() {
        let h = harness(Some(r#"{"summary": "partial"}"#)).await;
        seed(&h.store, "r1", "u1", Some(50.0)).await;

        let report = finalized(h.pipeline.run("r1").await.unwrap());
        assert_eq!(report.completion_status, CompletionStatus::InProgress);
        assert_eq!(report.usage, UsageStatus::BelowThreshold);
        assert_eq!(report.summary, SummaryStatus::Generated);
        assert_eq!(usage::count_usage_events(h.store.pool(), "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_percent_skips_extraction() {
        let h = harness(Some(r#"{"summary": "never"}"#)).await;
        seed(&h.store, "r1", "u1", None).await;

        let report = finalized(h.pipeline.run("r1").await.unwrap());
        assert_eq!(report.completion_status, CompletionStatus::NotStarted);
        assert_eq!(report.summary, SummaryStatus::Skipped);
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_still_finalizes() {
        let h = harness(None).await;
        seed(&h.store, "r1", "u1", Some(90.0)).await;

        let report = finalized(h.pipeline.run("r1").await.unwrap());
        assert_eq!(report.summary, SummaryStatus::Unavailable);
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 3);

        let stored = h.store.load_response("r1").await.unwrap().unwrap();
        assert!(stored.is_finalized());
        assert!(stored.summary.is_none());
    }

    #[tokio::test]
    async fn test_usage_failure_still_finalizes() {
        let h = harness(Some(r#"{"summary": "ok"}"#)).await;
        // No profile exists for this owner
        seed(&h.store, "r1", "ghost", Some(90.0)).await;

        let report = finalized(h.pipeline.run("r1").await.unwrap());
        assert_eq!(report.usage, UsageStatus::Failed);
        assert_eq!(report.summary, SummaryStatus::Generated);
        assert!(h.store.load_response("r1").await.unwrap().unwrap().is_finalized());
    }

    #[tokio::test]
    async fn test_structural_failure_leaves_record_unfinalized() {
        let h = harness_with(Some(r#"{"summary": "ok"}"#), Arc::new(FailingEstimator)).await;
        seed(&h.store, "r1", "u1", Some(80.0)).await;

        let err = h.pipeline.run("r1").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage {
                stage: Stage::Completion,
                ..
            }
        ));

        let stored = h.store.load_response("r1").await.unwrap().unwrap();
        assert!(!stored.is_finalized());
        assert!(stored.end_time.is_none());
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(usage::count_usage_events(h.store.pool(), "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_start_time_is_timing_failure() {
        let h = harness(Some(r#"{"summary": "ok"}"#)).await;
        let mut response = ConversationResponse::new("r1", "u1", now());
        response.start_time = None;
        responses::insert_response(h.store.pool(), &response).await.unwrap();

        let err = h.pipeline.run("r1").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage {
                stage: Stage::Timing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let h = harness(None).await;
        let err = h.pipeline.run("missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::WordCount.to_string(), "word_count");
        assert_eq!(Stage::Timing.to_string(), "timing");
    }
}
