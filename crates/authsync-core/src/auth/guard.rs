//! Route guards evaluated before a page is rendered.
//!
//! Guards only look at the credential store, so they work the same in a
//! background render context as in an interactive one.

use tracing::debug;

use super::credentials::{CredentialName, CredentialStore};
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Proceed,
    Redirect(String),
}

/// Guest-only pages (the sign-in form): a visitor already holding an access
/// credential is sent to the authenticated landing route.
pub fn guest_guard(store: &dyn CredentialStore, config: &Config) -> GuardOutcome {
    if store.get(CredentialName::Access).is_some() {
        debug!(route = %config.authenticated_route, "Guest guard redirecting signed-in visitor");
        GuardOutcome::Redirect(config.authenticated_route.clone())
    } else {
        GuardOutcome::Proceed
    }
}

/// Authenticated pages: a visitor without an access credential is sent to
/// the unauthenticated landing route.
pub fn auth_guard(store: &dyn CredentialStore, config: &Config) -> GuardOutcome {
    if store.get(CredentialName::Access).is_some() {
        GuardOutcome::Proceed
    } else {
        debug!(route = %config.unauthenticated_route, "Auth guard redirecting anonymous visitor");
        GuardOutcome::Redirect(config.unauthenticated_route.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;

    #[test]
    fn test_guards() {
        let config = Config::default();
        let store = MemoryCredentialStore::new();

        assert_eq!(guest_guard(&store, &config), GuardOutcome::Proceed);
        assert_eq!(auth_guard(&store, &config), GuardOutcome::Redirect("/".to_string()));

        store
            .set(CredentialName::Access, "A1", &config.credential_options())
            .unwrap();

        assert_eq!(
            guest_guard(&store, &config),
            GuardOutcome::Redirect("/dashboard".to_string())
        );
        assert_eq!(auth_guard(&store, &config), GuardOutcome::Proceed);
    }
}
