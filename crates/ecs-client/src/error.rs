//! ECS client errors

use thiserror::Error;

/// Errors that can occur when calling the ECS/VPC RPC APIs
#[derive(Debug, Error)]
pub enum EcsError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an error code not covered by a more specific variant
    #[error("ECS API error {code}: {message}")]
    Api { code: String, message: String },

    /// JSON deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected credentials or signature
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The addressed resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request cannot succeed as written
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Flow control kicked in, retry later
    #[error("Throttled: {0}")]
    Throttled(String),
}

impl EcsError {
    /// Classifies an API error code returned in an RPC error body.
    pub fn from_code(code: &str, message: &str) -> Self {
        let message = message.to_string();
        if code.starts_with("Throttling") || code == "ServiceUnavailable" {
            Self::Throttled(format!("{}: {}", code, message))
        } else if code.starts_with("InvalidAccessKeyId")
            || code == "SignatureDoesNotMatch"
            || code == "Forbidden.RAM"
            || code == "IncompleteSignature"
        {
            Self::Authentication(format!("{}: {}", code, message))
        } else if code.ends_with(".NotFound") || code.ends_with("NotFound") {
            Self::NotFound(format!("{}: {}", code, message))
        } else if code.starts_with("InvalidParameter") || code.starts_with("MissingParameter") {
            Self::InvalidRequest(format!("{}: {}", code, message))
        } else {
            Self::Api { code: code.to_string(), message }
        }
    }

    /// True when the error says the resource is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
