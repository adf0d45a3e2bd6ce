//! Liveness and runtime counters
//!
//! `GET /health` is unauthenticated. Besides liveness it reports how many
//! users currently hold a usage lock and how background dispatch is doing,
//! which is the only place failed fire-and-forget deliveries surface
//! outside the logs.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::services::DispatchStatsSnapshot;
use crate::AppState;

/// Compile-time identification, from build.rs
#[derive(Debug, Serialize)]
pub struct BuildIdentity {
    pub git_hash: &'static str,
    pub built_at: &'static str,
    pub profile: &'static str,
}

impl BuildIdentity {
    pub fn current() -> Self {
        Self {
            git_hash: env!("GIT_HASH"),
            built_at: env!("BUILD_TIMESTAMP"),
            profile: env!("BUILD_PROFILE"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchHealth {
    pub transport: &'static str,
    #[serde(flatten)]
    pub stats: DispatchStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub build: BuildIdentity,
    pub uptime_seconds: i64,
    /// Users with a usage update in flight or queued
    pub held_keys: usize,
    pub dispatch: DispatchHealth,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthReport {
        status: "ok",
        module: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        build: BuildIdentity::current(),
        uptime_seconds: uptime.num_seconds().max(0),
        held_keys: state.locks.held_keys(),
        dispatch: DispatchHealth {
            transport: state.dispatcher.transport_name(),
            stats: state.dispatcher.stats(),
        },
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
