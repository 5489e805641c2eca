//! Wiring of collaborators into the gate and chat sessions.

use std::sync::Arc;

use tracing::info;

use vocalwise_shared::clock::Clock;
use vocalwise_store::{AnimationTracker, CredentialCache, KeyValueStore};

use crate::analysis::{AnalysisService, HttpAnalysisClient};
use crate::backend::{AuthProvider, BlobStore, DocumentStore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::login_guard::LoginGuard;
use crate::platform::Navigator;
use crate::send::SendSettings;
use crate::session::ChatSession;
use crate::session_gate::SessionGate;

/// Everything the core consumes from the outside.
pub struct Collaborators {
    pub auth: Arc<dyn AuthProvider>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: Arc<dyn Clock>,
}

pub struct App {
    config: ClientConfig,
    gate: Arc<SessionGate>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    tracker: Arc<AnimationTracker>,
    clock: Arc<dyn Clock>,
    analysis: Option<Arc<dyn AnalysisService>>,
}

impl App {
    pub fn new(config: ClientConfig, parts: Collaborators) -> Result<Self> {
        let guard = LoginGuard::new(parts.kv.clone(), parts.clock.clone(), config.lockout);
        let gate = Arc::new(SessionGate::new(
            parts.auth,
            parts.documents.clone(),
            parts.blobs.clone(),
            CredentialCache::new(parts.kv.clone()),
            guard,
            parts.navigator,
            parts.clock.clone(),
        ));
        let tracker = Arc::new(AnimationTracker::load(parts.kv));

        let analysis: Option<Arc<dyn AnalysisService>> = match &config.analysis_endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "media analysis enabled");
                Some(Arc::new(HttpAnalysisClient::new(
                    endpoint.clone(),
                    config.analysis_timeout,
                )?))
            }
            None => None,
        };

        Ok(Self {
            config,
            gate,
            documents: parts.documents,
            blobs: parts.blobs,
            tracker,
            clock: parts.clock,
            analysis,
        })
    }

    /// Replace the analysis service, e.g. with a local stand-in.
    pub fn with_analysis(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.analysis = Some(service);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    pub fn tracker(&self) -> &Arc<AnimationTracker> {
        &self.tracker
    }

    /// A fresh chat session; call [`ChatSession::start`] once signed in.
    pub fn session(&self) -> ChatSession {
        ChatSession::new(
            self.gate.clone(),
            self.documents.clone(),
            self.blobs.clone(),
            self.tracker.clone(),
            self.clock.clone(),
            SendSettings::from(&self.config),
            self.analysis.clone(),
        )
    }
}
