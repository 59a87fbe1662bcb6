//! API client every authenticated caller goes through.
//!
//! `ApiClient` stamps the default `Authorization` header on outgoing
//! requests and hands failures to the `RenewalCoordinator`. Callers never
//! handle a 401 themselves.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::{ApiError, RequestExecutor, RequestSpec, Response};
use crate::error::SessionError;
use crate::manager::SessionCore;
use crate::renewal::RenewalCoordinator;

/// Clone is cheap; clones share the renewal state machine.
#[derive(Clone)]
pub struct ApiClient {
    core: Arc<SessionCore>,
    executor: Arc<dyn RequestExecutor>,
    coordinator: Arc<RenewalCoordinator>,
}

impl ApiClient {
    pub(crate) fn new(core: Arc<SessionCore>, executor: Arc<dyn RequestExecutor>) -> Self {
        let coordinator = RenewalCoordinator::new(core.clone(), executor.clone());
        Self {
            core,
            executor,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<RenewalCoordinator> {
        &self.coordinator
    }

    /// Send a request. A request that already carries an authorization
    /// header keeps it; otherwise the current access credential is added.
    /// With no credential at all the request is not sent and
    /// `SessionError::NotAuthenticated` is returned.
    pub async fn send(&self, spec: RequestSpec) -> Result<Response, SessionError> {
        let spec = self.authorize(spec)?;
        let result = self.executor.execute(&spec).await;
        match result {
            Ok(response) => Ok(response),
            Err(error) => self.coordinator.handle_failure(spec, error).await,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let response = self.send(RequestSpec::get(path)).await?;
        response.json().map_err(SessionError::Transport)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SessionError> {
        let body = serde_json::to_value(body)
            .map_err(|e| SessionError::Transport(ApiError::InvalidRequest(e.to_string())))?;
        let response = self.send(RequestSpec::post(path, body)).await?;
        response.json().map_err(SessionError::Transport)
    }

    fn authorize(&self, spec: RequestSpec) -> Result<RequestSpec, SessionError> {
        if spec.has_authorization() {
            return Ok(spec);
        }
        match self.core.bearer() {
            Some(token) => Ok(spec.with_bearer(&token)),
            None => {
                debug!(path = %spec.path, "No access credential, request not sent");
                Err(SessionError::NotAuthenticated)
            }
        }
    }
}
