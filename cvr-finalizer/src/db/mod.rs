//! Storage collaborator for the finalization pipeline
//!
//! The pipeline only sees the `ResponseStore` trait; `SqliteStore` is the
//! production implementation over the shared SQLite database.

pub mod responses;
pub mod usage;

use async_trait::async_trait;
use cvr_common::db::{ConversationResponse, UsageCounters, UsageRecord};
use cvr_common::Result;
use sqlx::SqlitePool;

/// Result of recording one billable finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    /// Counters incremented; `capped` when a quota bound was hit
    Recorded {
        counters: UsageCounters,
        capped: bool,
    },
    /// This response was billed before; nothing changed
    AlreadyRecorded,
}

/// Reads and writes the pipeline needs
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Load one response by id
    async fn load_response(&self, id: &str) -> Result<Option<ConversationResponse>>;

    /// Write all derived fields and `finalized_at`
    ///
    /// Returns `false` when the record was already finalized, in which case
    /// nothing is written.
    async fn save_finalized(&self, response: &ConversationResponse) -> Result<bool>;

    /// Apply one usage event to the owner's counters, at most once per response
    async fn record_usage(&self, record: &UsageRecord) -> Result<UsageOutcome>;

    /// Current counters for a user
    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageCounters>>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ResponseStore for SqliteStore {
    async fn load_response(&self, id: &str) -> Result<Option<ConversationResponse>> {
        responses::load_response(&self.pool, id).await
    }

    async fn save_finalized(&self, response: &ConversationResponse) -> Result<bool> {
        responses::save_finalized(&self.pool, response).await
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<UsageOutcome> {
        usage::record_usage(&self.pool, record).await
    }

    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageCounters>> {
        usage::load_counters(&self.pool, user_id).await
    }
}
