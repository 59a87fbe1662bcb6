//! Shared fixtures: a scripted in-memory API and a recording navigator.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use authsync_core::api::ApiError;
use authsync_core::{
    BroadcastHub, Config, ContextKind, MemoryCredentialStore, Navigator, RequestExecutor,
    RequestSpec, Response, SessionManager,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

type Handler = dyn Fn(&RequestSpec) -> Result<Response, ApiError> + Send + Sync;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory stand-in for the remote API. Calls are recorded in the order
/// `execute` is invoked; requests to a held path wait until released.
pub struct ScriptedExecutor {
    calls: Mutex<Vec<RequestSpec>>,
    handler: Box<Handler>,
    held: Mutex<Vec<(String, Arc<Semaphore>)>>,
}

impl ScriptedExecutor {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&RequestSpec) -> Result<Response, ApiError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            held: Mutex::new(Vec::new()),
        })
    }

    /// Requests to `path` block until `release(path)`.
    pub fn hold(&self, path: &str) {
        self.held
            .lock()
            .push((path.to_string(), Arc::new(Semaphore::new(0))));
    }

    pub fn release(&self, path: &str) {
        if let Some((_, gate)) = self.held.lock().iter().find(|(p, _)| p == path) {
            gate.add_permits(1024);
        }
    }

    pub fn calls(&self) -> Vec<RequestSpec> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RequestSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path)
            .collect()
    }
}

impl RequestExecutor for ScriptedExecutor {
    fn execute<'a>(&'a self, spec: &'a RequestSpec) -> BoxFuture<'a, Result<Response, ApiError>> {
        self.calls.lock().push(spec.clone());
        let gate = self
            .held
            .lock()
            .iter()
            .find(|(p, _)| *p == spec.path)
            .map(|(_, gate)| gate.clone());

        Box::pin(async move {
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            (self.handler)(spec)
        })
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes.lock().push(route.to_string());
    }
}

pub fn expired() -> ApiError {
    ApiError::from_status(401, r#"{"error": true, "code": "token.expired"}"#)
}

pub fn bearer(spec: &RequestSpec) -> Option<&str> {
    spec.header("authorization")
}

/// A server that accepts `Bearer A2` (issued by renewing `R1`) and answers
/// anything older with `token.expired`.
pub fn rotating_server() -> Arc<ScriptedExecutor> {
    ScriptedExecutor::new(|spec| match spec.path.as_str() {
        "/refresh" => {
            let body = spec.body.clone().unwrap_or(Value::Null);
            if body["refreshToken"] == "R1" {
                Ok(Response::ok(json!({"accessToken": "A2", "refreshToken": "R2"})))
            } else {
                Err(ApiError::from_status(401, r#"{"code": "token.invalid"}"#))
            }
        }
        path if bearer(spec) == Some("Bearer A2") => Ok(Response::ok(json!({ "path": path }))),
        _ => Err(expired()),
    })
}

/// One execution context: a manager with its own bus endpoint and navigator.
pub struct Context {
    pub manager: SessionManager,
    pub navigator: Arc<RecordingNavigator>,
}

pub fn context(
    kind: ContextKind,
    executor: Arc<ScriptedExecutor>,
    store: &MemoryCredentialStore,
    hub: &BroadcastHub,
) -> Context {
    let navigator = Arc::new(RecordingNavigator::default());
    let config = Config {
        context_kind: kind,
        ..Config::default()
    };
    let manager = SessionManager::new(
        config,
        executor,
        Arc::new(store.clone()),
        Arc::new(hub.connect()),
        navigator.clone(),
    );
    Context { manager, navigator }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
