//! Identifier utilities

use uuid::Uuid;

/// Longest identifier accepted from callers
pub const MAX_ID_LEN: usize = 128;

/// Generate a random identifier (used to correlate dispatch logs)
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Validate a caller-supplied response identifier
///
/// Identifiers are opaque but must be 1..=128 characters of ASCII
/// alphanumerics, `-` or `_`. Returns the trimmed identifier.
pub fn validate_response_id(raw: &str) -> crate::Result<&str> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(crate::Error::InvalidInput("Response id is required".to_string()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(crate::Error::InvalidInput(format!(
            "Response id exceeds {} characters",
            MAX_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(crate::Error::InvalidInput(format!(
            "Response id contains invalid characters: {}",
            id
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        let id = generate();
        assert_eq!(validate_response_id(&id).unwrap(), id);
    }

    #[test]
    fn test_accepts_opaque_ids() {
        assert_eq!(validate_response_id("r1").unwrap(), "r1");
        assert_eq!(validate_response_id("  resp_01-AB ").unwrap(), "resp_01-AB");
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(validate_response_id("").is_err());
        assert!(validate_response_id("   ").is_err());
        assert!(validate_response_id("../etc/passwd").is_err());
        assert!(validate_response_id("a b").is_err());
        assert!(validate_response_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(validate_response_id(&"x".repeat(MAX_ID_LEN)).is_ok());
    }
}
