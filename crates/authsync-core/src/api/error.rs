use serde::Deserialize;
use thiserror::Error;

/// Error code the API sends with a 401 when the access credential expired.
pub const TOKEN_EXPIRED_CODE: &str = "token.expired";

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Transport-level failure of a single request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// No response at all: connection refused, DNS, timeout.
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}{}: {body}", code_suffix(.code))]
    Status {
        status: u16,
        code: Option<String>,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// How the session layer should treat a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Never reached a server; not an auth failure.
    NoResponse,
    /// 401 with `token.expired`: renew and replay.
    ExpiredCredential,
    /// 401 for any other reason.
    Unauthorized,
    /// Anything unrelated to authentication.
    Other,
}

/// ` (code)` when an error code is present, for display impls.
pub(crate) fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build a status error, pulling the machine-readable `code` out of a
    /// JSON error body when there is one.
    pub fn from_status(status: u16, body: &str) -> Self {
        let code = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.code);
        ApiError::Status {
            status,
            code,
            body: Self::truncate_body(body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ApiError::Network(_) => FailureKind::NoResponse,
            ApiError::Status { status: 401, code, .. } => {
                if code.as_deref() == Some(TOKEN_EXPIRED_CODE) {
                    FailureKind::ExpiredCredential
                } else {
                    FailureKind::Unauthorized
                }
            }
            _ => FailureKind::Other,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ApiError::from_status(status.as_u16(), &e.to_string())
        } else if e.is_decode() {
            ApiError::InvalidResponse(e.to_string())
        } else if e.is_builder() {
            ApiError::InvalidRequest(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_code_classified() {
        let err = ApiError::from_status(401, r#"{"error": true, "code": "token.expired"}"#);
        assert_eq!(err.code(), Some("token.expired"));
        assert_eq!(err.failure_kind(), FailureKind::ExpiredCredential);
    }

    #[test]
    fn test_other_401_is_unauthorized() {
        let invalid = ApiError::from_status(401, r#"{"code": "token.invalid"}"#);
        assert_eq!(invalid.failure_kind(), FailureKind::Unauthorized);

        let no_code = ApiError::from_status(401, "Unauthorized");
        assert_eq!(no_code.code(), None);
        assert_eq!(no_code.failure_kind(), FailureKind::Unauthorized);
    }

    #[test]
    fn test_expired_code_on_other_status_is_not_auth() {
        let err = ApiError::from_status(403, r#"{"code": "token.expired"}"#);
        assert_eq!(err.failure_kind(), FailureKind::Other);
        assert_eq!(ApiError::from_status(500, "").failure_kind(), FailureKind::Other);
    }

    #[test]
    fn test_network_error_has_no_response() {
        let err = ApiError::Network("connection refused".to_string());
        assert_eq!(err.status(), None);
        assert_eq!(err.failure_kind(), FailureKind::NoResponse);
    }

    #[test]
    fn test_long_body_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        match ApiError::from_status(500, &body) {
            ApiError::Status { body, .. } => {
                assert!(body.contains("truncated, 510 total bytes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_display_includes_code() {
        let err = ApiError::from_status(401, r#"{"code": "token.expired"}"#);
        assert!(err.to_string().starts_with("HTTP 401 (token.expired)"));
    }
}
