//! Finalization status polling

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use cvr_common::db::CompletionStatus;
use cvr_common::ids::validate_response_id;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Observable outcome of a finalization
#[derive(Debug, Serialize)]
pub struct ResponseStatus {
    pub id: String,
    pub completion_status: CompletionStatus,
    pub completion_percentage: u8,
    pub finalized: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub has_summary: bool,
}

/// GET /api/responses/:id/status
pub async fn get_response_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResponseStatus>> {
    let id = validate_response_id(&id)?;
    let response = state
        .store
        .load_response(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Conversation response not found: {}", id)))?;

    Ok(Json(ResponseStatus {
        id: response.id.clone(),
        completion_status: response.completion_status,
        completion_percentage: response.completion_percentage,
        finalized: response.is_finalized(),
        finalized_at: response.finalized_at,
        has_summary: response.summary.is_some(),
    }))
}
