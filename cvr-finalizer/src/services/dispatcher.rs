//! Finalization dispatcher
//!
//! Boundary between the synchronous trigger and the asynchronous pipeline.
//! `dispatch` validates the request, refuses to run without a configured
//! shared secret, hands the id to a transport on a detached task and
//! answers the caller at once. Delivery failures are logged and counted,
//! never reported back to the caller.

use async_trait::async_trait;
use cvr_common::api::{AcceptedResponse, FinalizeRequest, INTERNAL_SECRET_HEADER};
use cvr_common::ids;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::pipeline::FinalizationPipeline;

/// Path of the internal worker endpoint
pub const INTERNAL_FINALIZE_PATH: &str = "/internal/finalize";

/// The worker runs the whole pipeline before answering, LLM retries included
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous dispatch errors (visible to the original caller)
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Internal shared secret is not configured")]
    SecretNotConfigured,
}

/// Counters for background deliveries
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of `DispatchStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub dispatched: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Carries a validated id to whatever runs the pipeline
#[async_trait]
pub trait DispatchTransport: Send + Sync {
    async fn deliver(&self, id: &str) -> anyhow::Result<()>;

    /// Short name for logs and health output
    fn name(&self) -> &'static str;
}

/// Self-addressed POST to the internal worker endpoint
pub struct HttpTransport {
    http_client: reqwest::Client,
    url: String,
    secret: String,
}

impl HttpTransport {
    pub fn new(internal_base_url: &str, secret: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DELIVERY_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            url: format!(
                "{}{}",
                internal_base_url.trim_end_matches('/'),
                INTERNAL_FINALIZE_PATH
            ),
            secret: secret.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DispatchTransport for HttpTransport {
    async fn deliver(&self, id: &str) -> anyhow::Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .json(&FinalizeRequest::new(id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("internal worker answered {}: {}", status, body);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-process queue drained by `spawn_channel_worker`
#[derive(Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end for the worker
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DispatchTransport for ChannelTransport {
    async fn deliver(&self, id: &str) -> anyhow::Result<()> {
        self.sender
            .send(id.to_string())
            .await
            .map_err(|_| anyhow::anyhow!("finalization worker has shut down"))
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

/// Drain queued ids, running one pipeline task per id
///
/// Runs until every `ChannelTransport` clone has been dropped.
pub fn spawn_channel_worker(
    mut receiver: mpsc::Receiver<String>,
    pipeline: Arc<FinalizationPipeline>,
    stats: Arc<DispatchStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("In-process finalization worker started");

        while let Some(id) = receiver.recv().await {
            let pipeline = Arc::clone(&pipeline);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                if let Err(e) = pipeline.run(&id).await {
                    stats.record_failed();
                    tracing::error!(response_id = %id, error = %e, "Queued finalization failed");
                }
            });
        }

        tracing::info!("In-process finalization worker stopped");
    })
}

pub struct FinalizationDispatcher {
    transport: Arc<dyn DispatchTransport>,
    secret_configured: bool,
    stats: Arc<DispatchStats>,
}

impl FinalizationDispatcher {
    pub fn new(
        transport: Arc<dyn DispatchTransport>,
        secret_configured: bool,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            transport,
            secret_configured,
            stats,
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Validate and hand off; never waits for the delivery
    pub fn dispatch(&self, request: &FinalizeRequest) -> Result<AcceptedResponse, DispatchError> {
        let id = request.validated_id().map_err(|e| match e {
            cvr_common::Error::InvalidInput(msg) => DispatchError::InvalidRequest(msg),
            other => DispatchError::InvalidRequest(other.to_string()),
        })?;

        if !self.secret_configured {
            tracing::error!(response_id = %id, "Refusing dispatch: internal shared secret is not configured");
            return Err(DispatchError::SecretNotConfigured);
        }

        let owned_id = id.to_string();
        let dispatch_id = ids::generate();
        let task_dispatch_id = dispatch_id.clone();
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        stats.record_dispatched();

        tokio::spawn(async move {
            match transport.deliver(&owned_id).await {
                Ok(()) => {
                    tracing::debug!(
                        response_id = %owned_id,
                        dispatch_id = %task_dispatch_id,
                        transport = transport.name(),
                        "Finalization delivered"
                    );
                }
                Err(e) => {
                    stats.record_failed();
                    tracing::error!(
                        response_id = %owned_id,
                        dispatch_id = %task_dispatch_id,
                        transport = transport.name(),
                        error = %format!("{:#}", e),
                        "Finalization dispatch failed"
                    );
                }
            }
        });

        tracing::info!(
            response_id = %id,
            dispatch_id = %dispatch_id,
            transport = self.transport.name(),
            "Finalization accepted"
        );
        Ok(AcceptedResponse::new(id))
    }
}
