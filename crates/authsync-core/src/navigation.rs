//! Navigation sink for the UI layer.
//!
//! The session core decides *where* the user should be; rendering is someone
//! else's job. A `Navigator` receives route changes.

use tokio::sync::watch;
use tracing::info;

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Navigator for headless contexts: records the route in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, route: &str) {
        info!(route, "Navigate");
    }
}

/// Publishes the current route on a watch channel for a UI to follow.
pub struct RouteWatch {
    tx: watch::Sender<String>,
}

impl RouteWatch {
    pub fn new(initial: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(initial.into());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }
}

impl Navigator for RouteWatch {
    fn navigate(&self, route: &str) {
        // send_replace keeps the value even with no receivers attached
        self.tx.send_replace(route.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_route_watch_notifies_receivers() {
        let routes = RouteWatch::new("/");
        let mut rx = routes.subscribe();

        routes.navigate("/dashboard");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_str(), "/dashboard");
        assert_eq!(routes.current(), "/dashboard");
    }

    #[test]
    fn test_route_watch_without_receivers() {
        let routes = RouteWatch::new("/");
        routes.navigate("/dashboard");
        assert_eq!(routes.current(), "/dashboard");
    }
}
