//! Request DTOs for the HTTP API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::MAX_KEY_LENGTH;

/// Request body for `PUT /cache/:tier`
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: Value,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} characters",
                MAX_KEY_LENGTH
            ));
        }
        None
    }
}

/// Request body for `DELETE /uploads`
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteUploadRequest {
    /// Stored file path, relative to the upload root or absolute
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"key": "lang", "value": {"code": "pt-BR"}}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "lang");
        assert_eq!(req.value, json!({"code": "pt-BR"}));
    }

    #[test]
    fn test_validate_empty_key() {
        let req = SetRequest {
            key: "".to_string(),
            value: json!(1),
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_validate_long_key() {
        let req = SetRequest {
            key: "k".repeat(MAX_KEY_LENGTH + 1),
            value: json!(null),
        };
        assert!(req.validate().unwrap().contains("256"));
    }

    #[test]
    fn test_validate_valid_request() {
        let req = SetRequest {
            key: "valid_key".to_string(),
            value: json!([1, 2, 3]),
        };
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_delete_upload_request() {
        let req: DeleteUploadRequest =
            serde_json::from_str(r#"{"path": "documents/2025/01/a.pdf"}"#).unwrap();
        assert_eq!(req.path, "documents/2025/01/a.pdf");
    }
}
