//! Capabilities that differ per platform, injected instead of branched on.

use std::sync::Mutex;

use async_trait::async_trait;

/// Screens the core can send the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Login,
    Chat,
    Recovery,
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Asks the user to confirm a destructive action.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Navigator that only remembers where it was sent.
#[derive(Debug, Default)]
pub struct NavigationLog {
    routes: Mutex<Vec<Route>>,
}

impl NavigationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Route> {
        self.routes.lock().ok().and_then(|r| r.last().copied())
    }

    pub fn history(&self) -> Vec<Route> {
        self.routes.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Navigator for NavigationLog {
    fn navigate(&self, route: Route) {
        tracing::debug!(?route, "navigate");
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(route);
        }
    }
}

/// Confirmer with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysAnswer(pub bool);

#[async_trait]
impl Confirmer for AlwaysAnswer {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}
