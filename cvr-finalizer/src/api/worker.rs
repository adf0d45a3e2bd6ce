//! Internal worker endpoint
//!
//! Reached only through `require_internal_secret`. Runs the pipeline to
//! completion before answering.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use cvr_common::api::FinalizeRequest;
use std::sync::Arc;
use tracing::error;

use crate::error::{ApiError, ApiResult};
use crate::services::FinalizeOutcome;
use crate::AppState;

/// POST /internal/finalize
pub async fn run_finalization(
    State(state): State<AppState>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> ApiResult<Json<FinalizeOutcome>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = request.validated_id()?.to_string();

    // Detached so a dropped caller connection cannot cancel a run midway
    let pipeline = Arc::clone(&state.pipeline);
    let task_id = id.clone();
    let outcome = tokio::spawn(async move { pipeline.run(&task_id).await })
        .await
        .map_err(|e| ApiError::Internal(format!("Finalization task aborted: {}", e)))?;

    match outcome {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            error!(response_id = %id, error = %e, "Finalization failed");
            Err(e.into())
        }
    }
}
