//! Single-flight credential renewal.
//!
//! When a request fails because the access credential expired, the
//! coordinator renews it exactly once no matter how many requests hit the
//! same wall, then replays every queued request with the new credential in
//! the order they were queued.
//!
//! ```text
//!   Idle --expired--> Renewing(queue=[r1])      spawn renewal
//!   Renewing --expired--> Renewing(queue+=rN)   no second renewal call
//!   Renewing --renewed--> Idle                  persist pair, replay queue FIFO, then idle
//!   Renewing --failed--> Idle                   sign out if observable, reject queue, then idle
//! ```
//!
//! Refresh credentials are typically single-use, so two overlapping renewal
//! calls would invalidate each other and end the session.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::{ApiError, FailureKind, RequestExecutor, RequestSpec, Response};
use crate::auth::{CredentialName, CredentialPair};
use crate::error::{RenewalError, SessionError};
use crate::manager::SessionCore;

type Reply = oneshot::Sender<Result<Response, SessionError>>;

/// A request parked behind an in-flight renewal.
struct PendingRequest {
    spec: RequestSpec,
    reply: Reply,
}

enum NextStep {
    Wait,
    Renew,
    Replay(RequestSpec, String),
}

/// The queue only exists while a renewal is in flight.
enum RenewalState {
    Idle,
    Renewing { queue: VecDeque<PendingRequest> },
}

pub struct RenewalCoordinator {
    core: Arc<SessionCore>,
    executor: Arc<dyn RequestExecutor>,
    state: Mutex<RenewalState>,
}

impl RenewalCoordinator {
    pub(crate) fn new(core: Arc<SessionCore>, executor: Arc<dyn RequestExecutor>) -> Arc<Self> {
        Arc::new(Self {
            core,
            executor,
            state: Mutex::new(RenewalState::Idle),
        })
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*self.state.lock(), RenewalState::Renewing { .. })
    }

    /// Number of requests waiting for the in-flight renewal.
    pub fn queued(&self) -> usize {
        match &*self.state.lock() {
            RenewalState::Idle => 0,
            RenewalState::Renewing { queue } => queue.len(),
        }
    }

    /// Decide what a failed request turns into. `spec` is the request
    /// exactly as it was sent.
    pub(crate) async fn handle_failure(
        self: &Arc<Self>,
        spec: RequestSpec,
        error: ApiError,
    ) -> Result<Response, SessionError> {
        match error.failure_kind() {
            FailureKind::NoResponse | FailureKind::Other => Err(SessionError::Transport(error)),
            FailureKind::Unauthorized => Err(self.unauthorized(error)),
            FailureKind::ExpiredCredential => self.renew_and_replay(spec).await,
        }
    }

    fn unauthorized(&self, error: ApiError) -> SessionError {
        let code = error.code().map(str::to_string);
        if self.core.config.context_kind.is_observable() {
            warn!(code = ?code, "Request unauthorized, signing out");
            self.core.sign_out(false);
        } else {
            debug!(code = ?code, "Request unauthorized in background context");
        }
        SessionError::Unauthorized { code }
    }

    async fn renew_and_replay(self: &Arc<Self>, spec: RequestSpec) -> Result<Response, SessionError> {
        let (reply, rx) = oneshot::channel();

        let next = {
            let mut state = self.state.lock();
            if let RenewalState::Renewing { queue } = &mut *state {
                queue.push_back(PendingRequest { spec, reply });
                debug!(queued = queue.len(), "Queued request behind in-flight renewal");
                NextStep::Wait
            } else if let Some(current) = self.renewed_since(&spec) {
                // Sent with a credential that has already been replaced
                NextStep::Replay(spec, current)
            } else {
                *state = RenewalState::Renewing {
                    queue: VecDeque::from([PendingRequest { spec, reply }]),
                };
                NextStep::Renew
            }
        };

        match next {
            NextStep::Replay(spec, current) => {
                debug!(path = %spec.path, "Replaying request with already renewed credential");
                return self.replay(&spec, &current).await;
            }
            NextStep::Renew => {
                debug!("Access credential expired, starting renewal");
                // Spawned so a dropped caller cannot strand the queue
                let coordinator = Arc::clone(self);
                tokio::spawn(async move { coordinator.run_renewal().await });
            }
            NextStep::Wait => {}
        }

        rx.await
            .unwrap_or(Err(SessionError::RenewalFailed(RenewalError::Interrupted)))
    }

    /// The stored access credential, if it differs from the one `spec` was
    /// sent with.
    fn renewed_since(&self, spec: &RequestSpec) -> Option<String> {
        let current = self.core.store.get(CredentialName::Access)?;
        let sent = spec.header("authorization")?;
        if sent == format!("Bearer {}", current) {
            None
        } else {
            Some(current)
        }
    }

    /// Stays `Renewing` until every queued request has been answered, so a
    /// request failing meanwhile joins the queue instead of renewing again.
    async fn run_renewal(self: Arc<Self>) {
        match self.request_new_pair().await {
            Ok(pair) => {
                let token = pair.access_token;
                // Requests queued while a batch replays go out in the next batch
                while let Some(batch) = self.next_batch() {
                    info!(queued = batch.len(), "Access credential renewed, replaying queued requests");
                    let coordinator: &RenewalCoordinator = &self;
                    // join_all polls in queue order, so dispatch stays FIFO
                    let replays = batch.into_iter().map(|pending| {
                        let token = token.as_str();
                        async move {
                            let result = coordinator.replay(&pending.spec, token).await;
                            let _ = pending.reply.send(result);
                        }
                    });
                    join_all(replays).await;
                }
            }
            Err(e) => {
                warn!(error = %e, queued = self.queued(), "Credential renewal failed");
                // Signed out before any waiter wakes up
                if self.core.config.context_kind.is_observable() {
                    self.core.sign_out(false);
                }
                let queue = {
                    let mut state = self.state.lock();
                    match std::mem::replace(&mut *state, RenewalState::Idle) {
                        RenewalState::Renewing { queue } => queue,
                        RenewalState::Idle => VecDeque::new(),
                    }
                };
                for pending in queue {
                    let _ = pending.reply.send(Err(SessionError::RenewalFailed(e.clone())));
                }
            }
        }
    }

    /// Take everything queued so far, or return to `Idle` once the queue is
    /// empty.
    fn next_batch(&self) -> Option<VecDeque<PendingRequest>> {
        let mut state = self.state.lock();
        if let RenewalState::Renewing { queue } = &mut *state {
            if !queue.is_empty() {
                return Some(std::mem::take(queue));
            }
        }
        *state = RenewalState::Idle;
        None
    }

    async fn request_new_pair(&self) -> Result<CredentialPair, RenewalError> {
        let refresh_token = self
            .core
            .store
            .get(CredentialName::Refresh)
            .ok_or(RenewalError::MissingRefreshCredential)?;

        let spec = RequestSpec::post(
            self.core.config.renewal_path.as_str(),
            json!({ "refreshToken": refresh_token }),
        );
        let response = self
            .executor
            .execute(&spec)
            .await
            .map_err(RenewalError::Rejected)?;
        let pair: CredentialPair = response.json().map_err(RenewalError::Rejected)?;

        pair.save(self.core.store.as_ref(), &self.core.config.credential_options())
            .map_err(RenewalError::Persist)?;
        self.core.set_bearer(Some(pair.access_token.clone()));
        Ok(pair)
    }

    /// Re-issue a request with `token`. A replay is never queued again: an
    /// auth failure here is final.
    async fn replay(&self, spec: &RequestSpec, token: &str) -> Result<Response, SessionError> {
        let spec = spec.with_bearer(token);
        match self.executor.execute(&spec).await {
            Ok(response) => Ok(response),
            Err(error) => match error.failure_kind() {
                FailureKind::ExpiredCredential => Err(SessionError::ExpiredCredential),
                FailureKind::Unauthorized => Err(self.unauthorized(error)),
                FailureKind::NoResponse | FailureKind::Other => {
                    Err(SessionError::Transport(error))
                }
            },
        }
    }
}
