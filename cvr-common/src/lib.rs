//! # CVR Common Library
//!
//! Shared code for the conversational-research services including:
//! - Conversation response data model and storage schema
//! - API request/response types and internal-call authentication
//! - Configuration loading
//! - Per-key serialization (`KeyedMutex`)
//! - Identifier and time utilities

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod keyed_mutex;
pub mod time;

pub use error::{Error, Result};
pub use keyed_mutex::KeyedMutex;
