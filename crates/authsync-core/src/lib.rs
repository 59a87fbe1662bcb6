//! authsync-core - client-side session management.
//!
//! This crate keeps an access/refresh credential pair alive for a client:
//!
//! - `auth`: credential storage backends, the in-memory `Session`, route guards
//! - `api`: replayable request values, the transport trait, and `ApiClient`
//! - `renewal`: single-flight credential renewal with FIFO replay of queued requests
//! - `bus`: sign-in/sign-out broadcast between execution contexts
//! - `manager`: `SessionManager`, which wires the pieces together
//!
//! Every collaborator is injected; nothing in this crate reaches for a
//! process-wide singleton.

pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod manager;
pub mod navigation;
pub mod renewal;

pub use api::{ApiClient, ApiError, HttpExecutor, Method, RequestExecutor, RequestSpec, Response};
pub use auth::{
    CredentialName, CredentialOptions, CredentialPair, CredentialStore, FileCredentialStore,
    KeyringCredentialStore, MemoryCredentialStore, Session,
};
pub use bus::{BroadcastEvent, BroadcastHub, CrossContextBus, LocalBus, Subscription};
pub use config::{Config, ContextKind};
pub use error::{RenewalError, SessionError};
pub use manager::SessionManager;
pub use navigation::{Navigator, RouteWatch, TracingNavigator};
pub use renewal::RenewalCoordinator;
