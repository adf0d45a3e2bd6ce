//! API module for shared HTTP API functionality
//!
//! Provides internal-call authentication and the request/response types
//! exchanged between the public trigger and the internal worker.
//!
//! This module contains ONLY pure functions and shared types. Each service
//! wraps them with framework-specific middleware (Axum).

pub mod auth;
pub mod types;

pub use auth::{ApiAuthError, Authenticator, SharedSecretAuthenticator, INTERNAL_SECRET_HEADER};
pub use types::{AcceptedResponse, ErrorBody, FinalizeRequest};
