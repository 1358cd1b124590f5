//! Error types for VM orchestration.

use serde::Deserialize;

/// Result type for VM operations.
pub type VmResult<T> = Result<T, VmError>;

/// Errors raised while managing the workflow VM.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Missing or invalid VM configuration. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported VM provider: {0}")]
    UnsupportedProvider(String),

    /// Cloud API returned an error response.
    #[error("API error (status {status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl VmError {
    /// Check if the next poll may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Decode(_) => true,
            Self::Api { status, code, .. } => {
                *status >= 500 || *status == 429 || code == "RequestLimitExceeded"
            }
            _ => false,
        }
    }

    /// Configuration errors are fatal to the orchestration attempt.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnsupportedProvider(_) | Self::InvalidUrl(_)
        )
    }

    pub(crate) fn missing_field(field: &str) -> Self {
        Self::Config(format!("Missing required VM configuration field: {}", field))
    }

    /// Create an API error from an EC2 error document.
    pub fn from_response(status: u16, body: &str) -> Self {
        match quick_xml::de::from_str::<ErrorResponse>(body) {
            Ok(response) => match response.errors.error.into_iter().next() {
                Some(error) => Self::Api {
                    status,
                    code: error.code,
                    message: error.message,
                },
                None => Self::Api {
                    status,
                    code: String::new(),
                    message: body.to_string(),
                },
            },
            Err(_) => Self::Api {
                status,
                code: String::new(),
                message: body.to_string(),
            },
        }
    }
}

/// `<Response><Errors><Error>..</Error></Errors></Response>`
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Errors")]
    errors: ErrorList,
}

#[derive(Debug, Deserialize)]
struct ErrorList {
    #[serde(rename = "Error", default)]
    error: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}
