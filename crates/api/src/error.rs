//! REST error taxonomy.

/// Errors from the device REST API, classified by how callers recover.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// 409: the resource already exists.
    #[error("already exists: {message}")]
    Conflict { message: String },

    /// 5xx or no response at all. Worth retrying.
    #[error("server unavailable: {message}")]
    Transient { status: Option<u16>, message: String },

    /// Any other rejection. The server's message is kept verbatim.
    #[error("{message}")]
    Terminal { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classifies a non-2xx response.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            409 => ApiError::Conflict { message },
            500..=599 => ApiError::Transient {
                status: Some(status),
                message,
            },
            _ => ApiError::Terminal { status, message },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Conflict { .. } => Some(409),
            ApiError::Transient { status, .. } => *status,
            ApiError::Terminal { status, .. } => Some(*status),
            ApiError::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ApiError::Decode(e.to_string());
        }
        ApiError::Transient {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(ApiError::from_status(409, "dup".into()).is_conflict());
        assert!(ApiError::from_status(500, "boom".into()).is_transient());
        assert!(ApiError::from_status(503, "later".into()).is_transient());
        let e = ApiError::from_status(422, "name too long".into());
        assert!(!e.is_transient() && !e.is_conflict());
        assert_eq!(e.status(), Some(422));
    }

    #[test]
    fn terminal_display_is_server_message() {
        let e = ApiError::from_status(400, "Device name is required".into());
        assert_eq!(e.to_string(), "Device name is required");
    }
}
