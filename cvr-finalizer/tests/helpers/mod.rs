//! Shared fixtures for cvr-finalizer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use chrono::Duration;
use cvr_common::config::{DispatchMode, TomlConfig};
use cvr_common::db::{init_memory_database, ChatMessage, ConversationResponse, Speaker};
use cvr_common::time::now;
use cvr_finalizer::db::{responses, usage, ResponseStore, SqliteStore};
use cvr_finalizer::services::{LlmClient, LlmError};
use cvr_finalizer::AppState;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SECRET: &str = "test-internal-secret";

/// Fake extraction model that counts its calls
pub struct ScriptedLlm {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| LlmError::ApiError(503, "model overloaded".to_string()))
    }
}

/// Configuration with fast retries and an unreachable internal worker
pub fn test_config(secret: Option<&str>, mode: DispatchMode) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.shared_secret = secret.map(str::to_string);
    config.internal_base_url = "http://127.0.0.1:1".to_string();
    config.dispatch.mode = mode;
    config.llm.retry_delay_ms = 1;
    config.llm.timeout_ms = 500;
    config
}

pub struct TestApp {
    pub state: AppState,
    pub store: SqliteStore,
    pub llm: Arc<ScriptedLlm>,
}

impl TestApp {
    pub fn router(&self) -> axum::Router {
        cvr_finalizer::build_router(self.state.clone())
    }
}

/// In-memory database with one profile (`u1`) and an assembled state
pub async fn setup(config: TomlConfig, llm: Arc<ScriptedLlm>) -> TestApp {
    let pool = init_memory_database().await.unwrap();
    usage::insert_profile(&pool, "u1", 100, 1000).await.unwrap();
    let store = SqliteStore::new(pool);
    let state = AppState::assemble(&config, Arc::new(store.clone()), llm.clone()).unwrap();
    TestApp { state, store, llm }
}

/// Insert an ended interview whose agent reported `progress` percent
pub async fn seed_response(store: &SqliteStore, id: &str, owner: &str, progress: Option<f64>) {
    let mut response = ConversationResponse::new(id, owner, now() - Duration::minutes(9));
    response.interview_type = "discovery".to_string();
    response.conversation_plan = "1. Current tools\n2. Frustrations".to_string();
    response.raw_messages = vec![
        ChatMessage::new(Speaker::Assistant, "What do you use for notes today?"),
        ChatMessage::new(Speaker::User, "A spreadsheet, and it is slow"),
        ChatMessage::new(Speaker::Assistant, "What frustrates you most?"),
        ChatMessage::new(Speaker::User, "Search"),
    ];
    response.agent_progress = progress;
    responses::insert_response(store.pool(), &response).await.unwrap();
}

pub async fn load(store: &SqliteStore, id: &str) -> ConversationResponse {
    store.load_response(id).await.unwrap().unwrap()
}

pub fn json_request(uri: &str, body: &str, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(cvr_common::api::INTERNAL_SECRET_HEADER, secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll until `condition` holds, or fail after roughly five seconds
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
