//! Request plumbing between callers and the remote API.
//!
//! This module provides the replayable `RequestSpec` value, the abstract
//! `RequestExecutor` transport with its reqwest implementation, and the
//! `ApiClient` every authenticated caller goes through.
//!
//! The API authenticates with `Authorization: Bearer <access token>`.

pub mod client;
pub mod error;
pub mod executor;
pub mod request;

pub use client::ApiClient;
pub use error::{ApiError, FailureKind, TOKEN_EXPIRED_CODE};
pub use executor::{HttpExecutor, RequestExecutor};
pub use request::{Method, RequestSpec, Response};
