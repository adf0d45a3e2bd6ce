//! Public finalization trigger
//!
//! Answers 202 as soon as the dispatch is handed off. Finalization
//! failures never reach this caller; poll the status endpoint instead.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use cvr_common::api::{AcceptedResponse, FinalizeRequest};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/responses/finalize
pub async fn trigger_finalize(
    State(state): State<AppState>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let accepted = state.dispatcher.dispatch(&request)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
