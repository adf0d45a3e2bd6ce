//! Threshold-gated usage accounting
//!
//! Usage is billed only when a response's completion percentage is
//! strictly above the product threshold. All writes to a user's counters
//! go through here, serialized per user by the shared `KeyedMutex`.

use cvr_common::db::{ConversationResponse, UsageRecord};
use cvr_common::{KeyedMutex, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{ResponseStore, UsageOutcome};

/// What the usage stage did for one finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    /// Completion at or below the threshold; nothing billed
    BelowThreshold,
    Recorded,
    /// Recorded, but a counter was held at its quota
    Capped,
    /// Billed by an earlier finalization attempt
    AlreadyRecorded,
    /// The store rejected the write; logged and skipped
    Failed,
}

/// Whether a completion percentage earns billed usage
pub fn is_billable(completion_percentage: u8, threshold_percent: u8) -> bool {
    completion_percentage > threshold_percent
}

pub struct UsageAccountant {
    store: Arc<dyn ResponseStore>,
    locks: Arc<KeyedMutex<String>>,
    threshold_percent: u8,
}

impl UsageAccountant {
    pub fn new(
        store: Arc<dyn ResponseStore>,
        locks: Arc<KeyedMutex<String>>,
        threshold_percent: u8,
    ) -> Self {
        Self {
            store,
            locks,
            threshold_percent,
        }
    }

    /// Record usage for `response` if its completion earns it
    pub async fn account_if_eligible(&self, response: &ConversationResponse) -> Result<UsageStatus> {
        if !is_billable(response.completion_percentage, self.threshold_percent) {
            tracing::debug!(
                response_id = %response.id,
                completion_percentage = response.completion_percentage,
                threshold = self.threshold_percent,
                "Completion below usage threshold, not billing"
            );
            return Ok(UsageStatus::BelowThreshold);
        }

        let record = UsageRecord {
            response_id: response.id.clone(),
            user_id: response.owner_id.clone(),
            minutes: response.duration_minutes.unwrap_or(0),
        };

        let outcome = self
            .locks
            .run_exclusive(response.owner_id.clone(), || self.store.record_usage(&record))
            .await?;

        let (status, counters) = match outcome {
            UsageOutcome::Recorded { counters, capped } => {
                let status = if capped {
                    UsageStatus::Capped
                } else {
                    UsageStatus::Recorded
                };
                (status, Some(counters))
            }
            UsageOutcome::AlreadyRecorded => (UsageStatus::AlreadyRecorded, None),
        };

        match counters {
            Some(counters) => tracing::info!(
                response_id = %record.response_id,
                user_id = %record.user_id,
                minutes = record.minutes,
                responses_used = counters.responses_used,
                minutes_used = counters.minutes_used,
                status = ?status,
                "Usage accounted"
            ),
            None => tracing::info!(
                response_id = %record.response_id,
                user_id = %record.user_id,
                "Usage already accounted for this response"
            ),
        }
        Ok(status)
    }
}
