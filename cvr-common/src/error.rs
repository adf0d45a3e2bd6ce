//! Error type shared by the CVR crates
//!
//! HTTP services map these onto status codes: `InvalidInput` is a client
//! error, `NotFound` a 404, everything else a server-side failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded for storage
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored JSON column no longer decodes
    #[error("Corrupt {column} for {id}: {source}")]
    CorruptRecord {
        id: String,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied value rejected before any work was done
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller, not the service, is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(Error::InvalidInput("bad id".into()).is_client_error());
        assert!(Error::NotFound("r1".into()).is_client_error());
        assert!(!Error::Config("missing".into()).is_client_error());
    }

    #[test]
    fn test_corrupt_record_names_column() {
        let source = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err = Error::CorruptRecord {
            id: "r1".to_string(),
            column: "raw_messages",
            source,
        };
        assert!(err.to_string().starts_with("Corrupt raw_messages for r1"));
    }
}
