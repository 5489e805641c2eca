#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vocalwise_client::analysis::{AnalysisRequest, AnalysisService};
use vocalwise_client::backend::memory::InMemoryBackend;
use vocalwise_client::backend::{DocumentStore, WriteBatch};
use vocalwise_client::platform::NavigationLog;
use vocalwise_client::send::{Composer, SendOutcome, SendReport};
use vocalwise_client::{App, ChatError, ChatSession, ClientConfig, Collaborators};
use vocalwise_shared::clock::ManualClock;
use vocalwise_shared::models::{NewConversation, NewMessage, User};
use vocalwise_shared::types::ConversationId;
use vocalwise_store::MemoryStore;

pub const WAIT: Duration = Duration::from_secs(2);
pub const EMAIL: &str = "ana@example.com";
pub const PASSWORD: &str = "secret1";

pub struct Harness {
    pub backend: InMemoryBackend,
    pub kv: Arc<MemoryStore>,
    pub nav: Arc<NavigationLog>,
    pub clock: ManualClock,
    pub app: App,
}

/// Defaults with the automated reply off and short settle waits.
pub fn quiet_config() -> ClientConfig {
    ClientConfig {
        auto_reply_enabled: false,
        settle_interval: Duration::from_millis(5),
        ..ClientConfig::default()
    }
}

pub fn harness(config: ClientConfig) -> Harness {
    let backend = InMemoryBackend::new();
    let kv = Arc::new(MemoryStore::new());
    let nav = Arc::new(NavigationLog::new());
    let clock = ManualClock::new(chrono::Utc::now());

    let app = App::new(
        config,
        Collaborators {
            auth: Arc::new(backend.clone()),
            documents: Arc::new(backend.clone()),
            blobs: Arc::new(backend.clone()),
            kv: kv.clone(),
            navigator: nav.clone(),
            clock: Arc::new(clock.clone()),
        },
    )
    .unwrap();

    Harness {
        backend,
        kv,
        nav,
        clock,
        app,
    }
}

pub async fn signed_in(config: ClientConfig) -> (Harness, User) {
    let h = harness(config);
    h.backend.add_account(EMAIL, PASSWORD, Some("Ana"));
    let user = h.app.gate().sign_in(EMAIL, PASSWORD).await.unwrap();
    (h, user)
}

pub async fn started(h: &Harness) -> ChatSession {
    let mut session = h.app.session();
    session.start().await.unwrap();
    // The first snapshot always arrives, even for an empty list.
    session.next_update().await.unwrap();
    session
}

/// A conversation with one message, written straight to the backend.
pub async fn seed_conversation(backend: &InMemoryBackend, owner: &User, text: &str) -> ConversationId {
    let id = backend
        .create_conversation(NewConversation {
            owner: owner.id.clone(),
            last_message: text.to_string(),
        })
        .await
        .unwrap();
    backend
        .commit(WriteBatch::post(&id, NewMessage::from_user(owner, text)))
        .await
        .unwrap();
    id
}

pub async fn send_text(
    composer: &Composer,
    text: &str,
    conversation: Option<ConversationId>,
) -> Result<SendReport, ChatError> {
    composer.set_text(text);
    match composer.send(conversation).await? {
        SendOutcome::Sent(report) => Ok(report),
        SendOutcome::Skipped(reason) => panic!("send skipped: {reason:?}"),
    }
}

/// Analysis stand-in with a fixed answer.
pub struct StubAnalysis(pub Result<String, String>);

#[async_trait]
impl AnalysisService for StubAnalysis {
    async fn analyze(&self, _request: &AnalysisRequest) -> vocalwise_client::Result<String> {
        self.0.clone().map_err(ChatError::AnalysisFailed)
    }
}
