//! Shared API request/response types

use serde::{Deserialize, Serialize};

/// Body of both the public trigger and the internal worker call
///
/// `id` is optional at the serde level so a missing id surfaces as a
/// validation error (400) rather than a deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FinalizeRequest {
    #[serde(default)]
    pub id: Option<String>,
}

impl FinalizeRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }

    /// Validated, trimmed identifier
    pub fn validated_id(&self) -> crate::Result<&str> {
        match self.id.as_deref() {
            Some(raw) => crate::ids::validate_response_id(raw),
            None => Err(crate::Error::InvalidInput(
                "Response id is required".to_string(),
            )),
        }
    }
}

/// Immediate answer to an accepted finalization trigger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub id: String,
}

impl AcceptedResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            id: id.into(),
        }
    }
}

/// Error payload shape shared by all services
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}
