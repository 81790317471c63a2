//! HTTP error response body
//!
//! The `IntoResponse` mapping for service errors lives in the binary crate;
//! this is only the wire shape.

use serde::Serialize;

/// Standard error response format for HTTP APIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable code, e.g. `STORAGE_UNAVAILABLE`.
    pub code: String,
    /// Whether repeating the request may succeed.
    pub recoverable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>, recoverable: bool) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            recoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat_body() {
        let body = ErrorResponse::new("Processing 5 not found", "NOT_FOUND", false);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["error"], "Processing 5 not found");
        assert_eq!(value["code"], "NOT_FOUND");
        assert_eq!(value["recoverable"], false);
    }
}
