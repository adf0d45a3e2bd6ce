//! Internal-call authentication middleware
//!
//! Guards the worker endpoint. Rejection happens here, before the handler
//! (and therefore before any pipeline stage) runs.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use cvr_common::api::{ApiAuthError, INTERNAL_SECRET_HEADER};
use tracing::{error, warn};

use crate::error::ApiError;
use crate::AppState;

/// Require the shared secret header on internal routes
///
/// 401 for a missing or wrong secret, 500 when the server has none
/// configured (fails closed).
pub async fn require_internal_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state.authenticator.verify(presented) {
        match e {
            ApiAuthError::NotConfigured => {
                error!("Internal call refused: shared secret is not configured");
            }
            _ => {
                warn!(path = %request.uri().path(), reason = %e, "Internal call rejected");
            }
        }
        return Err(e.into());
    }

    Ok(next.run(request).await)
}
