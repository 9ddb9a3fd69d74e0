//! Registration error types.

use pawlink_api::ApiError;
use pawlink_hub_connection::{CommandError, ConnectionError};
use pawlink_hub_store::StoreError;

/// Errors produced by discovery, registration and device actions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Bad input, rejected before any request is made.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// The hub answered a command with `success: false`.
    #[error("hub rejected command: {message}")]
    Rejected { message: String },

    /// Server unavailable after every allowed attempt.
    #[error("server unavailable after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// The server refused the request. `message` is the server's, verbatim.
    #[error("{message}")]
    Terminal { status: u16, message: String },

    #[error(transparent)]
    Api(ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistrationError {
    /// Classifies an API failure seen on attempt number `attempts`.
    pub fn from_api(e: ApiError, attempts: u32) -> Self {
        match e {
            ApiError::Transient { message, .. } => RegistrationError::Transient { attempts, message },
            ApiError::Terminal { status, message } => RegistrationError::Terminal { status, message },
            other => RegistrationError::Api(other),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistrationError::Transient { .. }
                | RegistrationError::Connection(ConnectionError::Transport(_))
                | RegistrationError::Command(CommandError::Timeout { .. })
        )
    }
}

impl From<ApiError> for RegistrationError {
    fn from(e: ApiError) -> Self {
        Self::from_api(e, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_are_classified() {
        let e = RegistrationError::from_api(
            ApiError::Transient {
                status: Some(502),
                message: "bad gateway".into(),
            },
            3,
        );
        assert_eq!(e.to_string(), "server unavailable after 3 attempt(s): bad gateway");
        assert!(e.is_retryable());

        let e: RegistrationError = ApiError::from_status(422, "Invalid MAC address".into()).into();
        assert_eq!(e.to_string(), "Invalid MAC address");
        assert!(!e.is_retryable());

        let e: RegistrationError = ApiError::Decode("eof".into()).into();
        assert!(matches!(e, RegistrationError::Api(_)));
    }
}
