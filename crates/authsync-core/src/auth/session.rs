use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::credentials::{CredentialName, CredentialOptions, CredentialStore, StoreError};

/// Identity data of the signed-in user.
///
/// Exists only while authenticated. It is a cache of what the server said
/// about the holder of the current access credential, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Session {
    pub fn new<P, R>(identity: impl Into<String>, permissions: P, roles: R) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            identity: identity.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether this user may see something guarded by `permissions`
    /// and `roles`: every listed permission is required, and at least one
    /// listed role. An empty list imposes no constraint.
    pub fn can(&self, permissions: &[&str], roles: &[&str]) -> bool {
        let has_all_permissions = permissions.iter().all(|p| self.permissions.contains(*p));
        let has_any_role = roles.is_empty() || roles.iter().any(|r| self.roles.contains(*r));
        has_all_permissions && has_any_role
    }
}

/// Access and refresh credentials as issued by the server.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: String,
}

// Token values stay out of logs
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Read the pair back from a store, if both halves are present.
    pub fn load(store: &dyn CredentialStore) -> Option<Self> {
        let access_token = store.get(CredentialName::Access)?;
        let refresh_token = store.get(CredentialName::Refresh)?;
        Some(Self {
            access_token,
            refresh_token,
        })
    }

    pub fn save(
        &self,
        store: &dyn CredentialStore,
        options: &CredentialOptions,
    ) -> Result<(), StoreError> {
        store.set(CredentialName::Access, &self.access_token, options)?;
        store.set(CredentialName::Refresh, &self.refresh_token, options)
    }
}
