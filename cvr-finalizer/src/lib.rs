//! cvr-finalizer library - conversation response finalization service
//!
//! Exposes the public finalization trigger, the shared-secret-guarded
//! internal worker endpoint, and the pipeline they drive.

use axum::Router;
use chrono::{DateTime, Utc};
use cvr_common::api::{Authenticator, SharedSecretAuthenticator};
use cvr_common::config::{DispatchMode, TomlConfig};
use cvr_common::KeyedMutex;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod services;

use db::ResponseStore;
use services::{
    spawn_channel_worker, ChannelTransport, DispatchStats, DispatchTransport, ExtractionStage,
    FinalizationDispatcher, FinalizationPipeline, HttpTransport, LlmClient,
    ReportedProgressEstimator, RetryPolicy, StandardCleaner, UsageAccountant,
};

/// Queue depth of the in-process dispatch channel
const IN_PROCESS_QUEUE_CAPACITY: usize = 256;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResponseStore>,
    pub pipeline: Arc<FinalizationPipeline>,
    pub dispatcher: Arc<FinalizationDispatcher>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Per-user lock table shared by every usage write
    pub locks: Arc<KeyedMutex<String>>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the pipeline, dispatcher and authenticator from configuration
    ///
    /// In `in_process` dispatch mode this spawns the queue worker, so it
    /// must be called from within a Tokio runtime.
    pub fn assemble(
        config: &TomlConfig,
        store: Arc<dyn ResponseStore>,
        llm: Arc<dyn LlmClient>,
    ) -> cvr_common::Result<Self> {
        let locks = Arc::new(KeyedMutex::new());
        let secret = config.effective_shared_secret();

        let accountant = UsageAccountant::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            config.policy.usage_threshold_percent,
        );
        let extraction = ExtractionStage::new(llm, RetryPolicy::from(&config.llm));
        let pipeline = Arc::new(FinalizationPipeline::new(
            Arc::clone(&store),
            Arc::new(StandardCleaner),
            Arc::new(ReportedProgressEstimator),
            accountant,
            extraction,
            config.policy.complete_threshold_percent,
        ));

        let stats = Arc::new(DispatchStats::default());
        let transport: Arc<dyn DispatchTransport> = match config.dispatch.mode {
            DispatchMode::Http => {
                let transport =
                    HttpTransport::new(&config.internal_base_url, secret.unwrap_or_default())
                        .map_err(|e| {
                            cvr_common::Error::Config(format!(
                                "Failed to build internal dispatch client: {}",
                                e
                            ))
                        })?;
                tracing::info!(url = %transport.url(), "Dispatching finalizations over HTTP");
                Arc::new(transport)
            }
            DispatchMode::InProcess => {
                let (transport, receiver) = ChannelTransport::new(IN_PROCESS_QUEUE_CAPACITY);
                spawn_channel_worker(receiver, Arc::clone(&pipeline), Arc::clone(&stats));
                tracing::info!("Dispatching finalizations to the in-process worker");
                Arc::new(transport)
            }
        };

        // Trigger and worker agree on whether the secret is usable
        let authenticator: Arc<dyn Authenticator> = Arc::new(SharedSecretAuthenticator::new(secret));
        let dispatcher = Arc::new(FinalizationDispatcher::new(
            transport,
            authenticator.is_configured(),
            stats,
        ));

        if !authenticator.is_configured() {
            tracing::warn!("No internal shared secret configured; finalization requests will be refused");
        }

        Ok(Self {
            store,
            pipeline,
            dispatcher,
            authenticator,
            locks,
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
///
/// The internal worker route sits behind the shared-secret middleware;
/// everything else is public.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let internal = Router::new()
        .route("/internal/finalize", post(api::run_finalization))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_internal_secret,
        ));

    let public = Router::new()
        .route("/api/responses/finalize", post(api::trigger_finalize))
        .route("/api/responses/:id/status", get(api::get_response_status))
        .merge(api::health_routes());

    Router::new()
        .merge(internal)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
