//! HTTP API handlers for cvr-finalizer

pub mod auth;
pub mod health;
pub mod status;
pub mod trigger;
pub mod worker;

pub use auth::require_internal_secret;
pub use health::health_routes;
pub use status::get_response_status;
pub use trigger::trigger_finalize;
pub use worker::run_finalization;
