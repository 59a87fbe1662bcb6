//! Session lifecycle for one execution context.
//!
//! `SessionManager` signs in, signs out, restores a session on startup, and
//! keeps this context in step with others through the cross-context bus.
//! The credential store is shared by all contexts and is the only durable
//! state; the in-memory `Session` is derived from it.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, FailureKind, HttpExecutor, RequestExecutor, RequestSpec};
use crate::auth::credentials::clear_all;
use crate::auth::{CredentialName, CredentialPair, CredentialStore, Session};
use crate::bus::{BroadcastEvent, BusError, CrossContextBus, Subscription};
use crate::config::Config;
use crate::error::SessionError;
use crate::navigation::Navigator;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    #[serde(alias = "token")]
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// State shared between the manager, the API client, and the renewal
/// coordinator of one context.
pub(crate) struct SessionCore {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn CredentialStore>,
    bus: Arc<dyn CrossContextBus>,
    navigator: Arc<dyn Navigator>,
    session: RwLock<Option<Session>>,
    /// Default outbound access credential, set on sign-in and renewal.
    bearer: RwLock<Option<String>>,
}

impl SessionCore {
    /// Access credential for outbound requests. The shared store wins so a
    /// renewal done by another context is picked up immediately.
    pub(crate) fn bearer(&self) -> Option<String> {
        self.store
            .get(CredentialName::Access)
            .or_else(|| self.bearer.read().clone())
    }

    pub(crate) fn set_bearer(&self, token: Option<String>) {
        *self.bearer.write() = token;
    }

    /// Clear both credentials, then tell the other contexts (unless this
    /// sign-out was itself triggered by a broadcast), then navigate.
    pub(crate) fn sign_out(&self, from_broadcast: bool) {
        if let Err(e) = clear_all(self.store.as_ref()) {
            warn!(error = %e, "Credentials could not be fully cleared during sign-out");
        }
        *self.session.write() = None;
        self.set_bearer(None);

        if !from_broadcast {
            self.bus.publish(BroadcastEvent::SignedOut);
        }

        info!(from_broadcast, "Signed out");
        self.navigator.navigate(&self.config.unauthenticated_route);
    }

    fn on_event(&self, event: BroadcastEvent) {
        match event {
            BroadcastEvent::SignedOut => self.sign_out(true),
            BroadcastEvent::SignedIn => {
                // The originating context already wrote the shared store
                debug!("Signed in from another context");
                self.navigator.navigate(&self.config.authenticated_route);
            }
        }
    }
}

pub struct SessionManager {
    core: Arc<SessionCore>,
    executor: Arc<dyn RequestExecutor>,
    api: ApiClient,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionManager {
    pub fn new(
        config: Config,
        executor: Arc<dyn RequestExecutor>,
        store: Arc<dyn CredentialStore>,
        bus: Arc<dyn CrossContextBus>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let core = Arc::new(SessionCore {
            config,
            store,
            bus,
            navigator,
            session: RwLock::new(None),
            bearer: RwLock::new(None),
        });
        let api = ApiClient::new(core.clone(), executor.clone());

        Self {
            core,
            executor,
            api,
            subscription: Mutex::new(None),
        }
    }

    /// Manager talking HTTP to `config.base_url`.
    pub fn from_config(
        config: Config,
        store: Arc<dyn CredentialStore>,
        bus: Arc<dyn CrossContextBus>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, SessionError> {
        let executor = HttpExecutor::new(&config).map_err(SessionError::Transport)?;
        Ok(Self::new(config, Arc::new(executor), store, bus, navigator))
    }

    /// Start listening for other contexts' sign-in/sign-out. Must be called
    /// once per context, inside a tokio runtime. The bus must be on the
    /// configured channel.
    pub fn start(&self) -> Result<(), SessionError> {
        let expected = &self.core.config.channel_name;
        let actual = self.core.bus.channel_name();
        if actual != expected {
            warn!(expected = %expected, actual, "Bus is on the wrong channel");
            return Err(BusError::ChannelMismatch {
                expected: expected.clone(),
                actual: actual.to_string(),
            }
            .into());
        }

        let core = self.core.clone();
        let subscription = self
            .core
            .bus
            .subscribe(Box::new(move |event| core.on_event(event)))?;
        *self.subscription.lock() = Some(subscription);
        debug!(channel = %self.core.config.channel_name, "Listening for cross-context events");
        Ok(())
    }

    /// Stop listening on the bus. Also happens when the manager is dropped.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Client for authenticated requests made on behalf of this session.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> Option<Session> {
        self.core.session.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.core.session.read().is_some()
    }

    /// Authenticate, persist the issued credentials, and announce the
    /// sign-in to other contexts.
    pub async fn sign_in(&self, identity: &str, secret: &str) -> Result<Session, SessionError> {
        let config = &self.core.config;
        let spec = RequestSpec::post(
            config.sign_in_path.as_str(),
            json!({ "email": identity, "password": secret }),
        );

        let response = self.executor.execute(&spec).await.map_err(|e| {
            warn!(error = %e, "Sign-in request failed");
            match e.failure_kind() {
                FailureKind::NoResponse => SessionError::Transport(e),
                _ => SessionError::SignInFailed(e),
            }
        })?;
        let issued: SignInResponse = response.json().map_err(|e: ApiError| {
            warn!(error = %e, "Malformed sign-in response");
            SessionError::SignInFailed(e)
        })?;

        let pair = CredentialPair::new(issued.access_token, issued.refresh_token);
        pair.save(self.core.store.as_ref(), &config.credential_options())?;

        let session = Session::new(identity, issued.permissions, issued.roles);
        *self.core.session.write() = Some(session.clone());
        self.core.set_bearer(Some(pair.access_token));

        info!(identity, "Signed in");
        self.core.navigator.navigate(&config.authenticated_route);
        self.core.bus.publish(BroadcastEvent::SignedIn);

        Ok(session)
    }

    /// Sign out locally and in every other context. Calling it again is
    /// harmless.
    pub fn sign_out(&self) {
        self.core.sign_out(false);
    }

    /// Restore the session on startup from a stored access credential.
    ///
    /// Returns `Ok(None)` when nothing is stored. If the identity fetch
    /// fails, an interactive context signs out; a background context only
    /// drops its in-memory session.
    pub async fn bootstrap(&self) -> Result<Option<Session>, SessionError> {
        if self.core.store.get(CredentialName::Access).is_none() {
            debug!("No stored access credential, starting signed out");
            return Ok(None);
        }

        match self.api.get::<Session>(&self.core.config.identity_path).await {
            Ok(session) => {
                info!(identity = %session.identity, "Session restored");
                *self.core.session.write() = Some(session.clone());
                Ok(Some(session))
            }
            Err(e) => {
                warn!(error = %e, "Failed to restore session");
                if self.core.config.context_kind.is_observable() {
                    self.core.sign_out(false);
                } else {
                    *self.core.session.write() = None;
                }
                Err(e)
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_response_accepts_short_field_names() {
        let json = r#"{"token": "A1", "refreshToken": "R1", "permissions": ["read"], "roles": ["user"]}"#;
        let parsed: SignInResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "A1");
        assert_eq!(parsed.refresh_token, "R1");
        assert_eq!(parsed.permissions, vec!["read".to_string()]);
    }

    #[tokio::test]
    async fn test_from_config_builds_http_manager() {
        use crate::auth::MemoryCredentialStore;
        use crate::bus::BroadcastHub;
        use crate::navigation::RouteWatch;

        let routes = Arc::new(RouteWatch::new("/"));
        let manager = SessionManager::from_config(
            Config::default(),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(BroadcastHub::new("auth").connect()),
            routes.clone(),
        )
        .unwrap();

        assert!(!manager.is_authenticated());
        manager.sign_out();
        assert_eq!(routes.current(), "/");
        assert_eq!(manager.bootstrap().await, Ok(None));
    }

    #[test]
    fn test_sign_in_response_defaults_missing_lists() {
        let json = r#"{"accessToken": "A1", "refreshToken": "R1"}"#;
        let parsed: SignInResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.permissions.is_empty());
        assert!(parsed.roles.is_empty());
    }
}
