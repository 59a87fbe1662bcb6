//! Authentication state: persisted credentials and the in-memory session.
//!
//! This module provides:
//! - `CredentialStore`: get/set/clear over the access and refresh credentials,
//!   with memory, file, and OS keychain backends
//! - `Session`: identity, permissions and roles of the signed-in user
//! - `guard`: route guards deciding where a page request should land
//!
//! Credentials are the only durable state; the session is rebuilt from them.

pub mod credentials;
pub mod guard;
pub mod session;

pub use credentials::{
    CredentialName, CredentialOptions, CredentialStore, FileCredentialStore,
    KeyringCredentialStore, MemoryCredentialStore, StoreError,
};
pub use guard::{auth_guard, guest_guard, GuardOutcome};
pub use session::{CredentialPair, Session};
