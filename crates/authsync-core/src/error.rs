use thiserror::Error;

use crate::api::error::code_suffix;
use crate::api::ApiError;
use crate::auth::StoreError;
use crate::bus::BusError;

/// Why a credential renewal did not produce a new pair.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenewalError {
    #[error("no refresh credential stored")]
    MissingRefreshCredential,

    #[error("renewal endpoint rejected the refresh credential: {0}")]
    Rejected(#[source] ApiError),

    #[error("failed to persist renewed credentials: {0}")]
    Persist(#[source] StoreError),

    #[error("renewal was interrupted before completing")]
    Interrupted,
}

/// Errors surfaced by the session layer.
///
/// Failures unrelated to authentication arrive as `Transport`, untouched.
/// Every variant is `Clone` so one renewal outcome can be handed to every
/// request queued behind it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Transport(ApiError),

    /// The replay of a request still came back with `token.expired`.
    #[error("Access credential expired")]
    ExpiredCredential,

    #[error("Unauthorized{}", code_suffix(.code))]
    Unauthorized { code: Option<String> },

    #[error("Credential renewal failed: {0}")]
    RenewalFailed(#[from] RenewalError),

    #[error("Sign-in failed: {0}")]
    SignInFailed(#[source] ApiError),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = SessionError::Unauthorized {
            code: Some("token.invalid".to_string()),
        };
        assert_eq!(err.to_string(), "Unauthorized (token.invalid)");
        assert_eq!(
            SessionError::Unauthorized { code: None }.to_string(),
            "Unauthorized"
        );

        let renewal: SessionError = RenewalError::MissingRefreshCredential.into();
        assert_eq!(
            renewal.to_string(),
            "Credential renewal failed: no refresh credential stored"
        );
    }

    #[test]
    fn test_transport_is_transparent() {
        let api = ApiError::Network("connection refused".to_string());
        let err = SessionError::Transport(api.clone());
        assert_eq!(err.to_string(), api.to_string());
    }
}
