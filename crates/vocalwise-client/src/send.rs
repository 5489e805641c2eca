//! Message sending.
//!
//! [`SendPipeline`] runs one send from upload to commit and the follow-up
//! work after it. [`Composer`] is the per-input-surface front end: it holds
//! the draft, refuses a second send while one is in flight and clears the
//! draft only once the message is persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vocalwise_shared::clock::Clock;
use vocalwise_shared::constants::{AUTO_REPLY_TEXT, UPLOAD_KEY_PREFIX};
use vocalwise_shared::models::{
    AttachmentKind, NewConversation, NewMessage, PendingAttachment, User,
};
use vocalwise_shared::types::{ConversationId, MessageId};
use vocalwise_shared::validation::{is_sendable, validate_attachment};

use crate::analysis::{AnalysisRequest, AnalysisService};
use crate::backend::{BackendError, BatchReceipt, BlobStore, DocumentStore, WriteBatch};
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::session_gate::SessionGate;

/// Progress of the send currently running through a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Uploading,
    Persisting,
    Analyzing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    NotRequested,
    /// The result was written as a system message.
    Completed(MessageId),
    /// The user's message stands; only the analysis is missing.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub text: String,
    pub attachment: Option<PendingAttachment>,
    /// `None` starts a new conversation.
    pub conversation: Option<ConversationId>,
}

#[derive(Debug)]
pub struct SendReport {
    pub conversation: ConversationId,
    pub created_conversation: bool,
    pub message_id: MessageId,
    pub committed_at: DateTime<Utc>,
    pub attachment_url: Option<String>,
    pub analysis: AnalysisOutcome,
    /// The delayed automated reply, if one was scheduled.
    pub follow_up: Option<JoinHandle<()>>,
}

impl SendReport {
    pub fn analysis_error(&self) -> Option<ChatError> {
        match &self.analysis {
            AnalysisOutcome::Failed(reason) => Some(ChatError::AnalysisFailed(reason.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendSettings {
    pub upload_timeout: Duration,
    pub analysis_timeout: Duration,
    pub auto_reply_enabled: bool,
    pub auto_reply_delay: Duration,
    pub settle_retries: u32,
    pub settle_interval: Duration,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SendSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            upload_timeout: config.upload_timeout,
            analysis_timeout: config.analysis_timeout,
            auto_reply_enabled: config.auto_reply_enabled,
            auto_reply_delay: config.auto_reply_delay,
            settle_retries: config.settle_retries,
            settle_interval: config.settle_interval,
        }
    }
}

/// Replace anything but `[A-Za-z0-9._-]` so a file name is safe in a blob key.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// `uploads/{epoch_millis}_{name}`
pub fn upload_key(at: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{UPLOAD_KEY_PREFIX}/{}_{}",
        at.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

pub type CreatedHook = Arc<dyn Fn(&ConversationId) + Send + Sync>;

pub struct SendPipeline {
    gate: Arc<SessionGate>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    analysis: Option<Arc<dyn AnalysisService>>,
    clock: Arc<dyn Clock>,
    settings: SendSettings,
    on_created: Option<CreatedHook>,
    state: watch::Sender<SendState>,
}

struct Uploaded {
    name: String,
    url: String,
    kind: AttachmentKind,
}

impl SendPipeline {
    pub fn new(
        gate: Arc<SessionGate>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: SendSettings,
    ) -> Self {
        let (state, _) = watch::channel(SendState::Idle);
        Self {
            gate,
            documents,
            blobs,
            analysis: None,
            clock,
            settings,
            on_created: None,
            state,
        }
    }

    pub fn with_analysis(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.analysis = Some(service);
        self
    }

    /// Called with the id of every conversation a send had to create.
    pub fn with_created_hook(mut self, hook: CreatedHook) -> Self {
        self.on_created = Some(hook);
        self
    }

    pub fn state(&self) -> watch::Receiver<SendState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SendState) {
        self.state.send_replace(state);
    }

    /// Run one send. Input with neither text nor attachment is skipped
    /// without touching the state.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome> {
        if !is_sendable(request.text.trim(), request.attachment.as_ref()) {
            debug!("nothing to send");
            return Ok(SendOutcome::Skipped(SkipReason::Empty));
        }

        let result = self.run(request).await;
        match &result {
            Ok(report) => {
                self.set_state(SendState::Completed);
                info!(
                    conversation = %report.conversation,
                    message = %report.message_id,
                    created = report.created_conversation,
                    "message sent"
                );
            }
            Err(e) => {
                self.set_state(SendState::Failed);
                warn!(error = %e, "send failed");
            }
        }
        result.map(SendOutcome::Sent)
    }

    async fn run(&self, request: SendRequest) -> Result<SendReport> {
        let text = request.text.trim().to_string();
        if let Some(attachment) = &request.attachment {
            validate_attachment(attachment)?;
        }

        let user = self.gate.verified_user().await?;

        let uploaded = match &request.attachment {
            Some(attachment) => {
                self.set_state(SendState::Uploading);
                Some(self.upload(attachment).await?)
            }
            None => None,
        };

        self.set_state(SendState::Persisting);

        let mut message = NewMessage::from_user(&user, text.clone());
        if let Some(up) = &uploaded {
            message = message.with_attachment(up.name.clone(), up.url.clone());
        }
        let preview = message.preview();

        let (conversation, created) = match request.conversation {
            Some(id) => {
                self.ensure_exists(&id, &user, &preview, false).await?;
                (id, false)
            }
            None => {
                let id = self
                    .documents
                    .create_conversation(NewConversation {
                        owner: user.id.clone(),
                        last_message: preview.clone(),
                    })
                    .await?;
                debug!(conversation = %id, "conversation created for send");
                if let Some(hook) = &self.on_created {
                    hook(&id);
                }
                self.ensure_exists(&id, &user, &preview, true).await?;
                (id, true)
            }
        };

        let receipt = self
            .commit_with_refresh(WriteBatch::post(&conversation, message))
            .await?;
        let message_id = receipt
            .message_ids
            .first()
            .cloned()
            .ok_or_else(|| ChatError::Backend(BackendError::Unavailable("no message id".into())))?;

        let analysis = match &uploaded {
            Some(up) if up.kind == AttachmentKind::Media => {
                self.analyze(&conversation, &up.url, &text).await
            }
            _ => AnalysisOutcome::NotRequested,
        };

        let follow_up = if self.settings.auto_reply_enabled && analysis == AnalysisOutcome::NotRequested {
            Some(self.schedule_auto_reply(conversation.clone()))
        } else {
            None
        };

        Ok(SendReport {
            conversation,
            created_conversation: created,
            message_id,
            committed_at: receipt.committed_at,
            attachment_url: uploaded.map(|u| u.url),
            analysis,
            follow_up,
        })
    }

    async fn upload(&self, attachment: &PendingAttachment) -> Result<Uploaded> {
        let key = upload_key(self.clock.now(), &attachment.file_name);
        let upload = async {
            let blob = self.blobs.upload(&key, attachment.bytes.clone()).await?;
            self.blobs.download_url(&blob).await
        };

        let url = match tokio::time::timeout(self.settings.upload_timeout, upload).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => return Err(ChatError::UploadFailed(e.to_string())),
            Err(_) => return Err(ChatError::UploadFailed(BackendError::Timeout.to_string())),
        };

        debug!(key, size = attachment.len(), "attachment uploaded");
        Ok(Uploaded {
            name: attachment.file_name.clone(),
            url,
            kind: attachment.kind(),
        })
    }

    /// Wait for the conversation to be readable. A conversation created by
    /// this send gets a few retries and is written again if it never shows
    /// up; an existing one must be there on the first read.
    async fn ensure_exists(
        &self,
        id: &ConversationId,
        user: &User,
        preview: &str,
        just_created: bool,
    ) -> Result<()> {
        let retries = if just_created { self.settings.settle_retries } else { 0 };

        for attempt in 0..=retries {
            if self.documents.get_conversation(id).await?.is_some() {
                if attempt > 0 {
                    debug!(conversation = %id, attempt, "conversation became readable");
                }
                return Ok(());
            }
            if attempt < retries {
                tokio::time::sleep(self.settings.settle_interval).await;
            }
        }

        if !just_created {
            return Err(ChatError::NotFound(id.to_string()));
        }

        warn!(conversation = %id, "created conversation not readable, writing it again");
        self.documents
            .put_conversation(
                id,
                NewConversation {
                    owner: user.id.clone(),
                    last_message: preview.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Commit, and on a permission error refresh the token and commit once
    /// more.
    async fn commit_with_refresh(&self, batch: WriteBatch) -> Result<BatchReceipt> {
        match self.documents.commit(batch.clone()).await {
            Err(BackendError::PermissionDenied) => {
                self.gate.refresh_after_denied().await?;
                Ok(self.documents.commit(batch).await?)
            }
            other => Ok(other?),
        }
    }

    async fn analyze(&self, conversation: &ConversationId, url: &str, context: &str) -> AnalysisOutcome {
        let Some(service) = &self.analysis else {
            return AnalysisOutcome::NotRequested;
        };
        self.set_state(SendState::Analyzing);

        let request = AnalysisRequest::new(url, context);
        let text = match tokio::time::timeout(self.settings.analysis_timeout, service.analyze(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(conversation = %conversation, error = %e, "analysis failed");
                return AnalysisOutcome::Failed(e.to_string());
            }
            Err(_) => {
                warn!(conversation = %conversation, "analysis timed out");
                return AnalysisOutcome::Failed("analysis timed out".into());
            }
        };

        match self
            .commit_with_refresh(WriteBatch::post(conversation, NewMessage::system(text)))
            .await
        {
            Ok(receipt) => match receipt.message_ids.into_iter().next() {
                Some(id) => AnalysisOutcome::Completed(id),
                None => AnalysisOutcome::Failed("no message id".into()),
            },
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "could not store analysis result");
                AnalysisOutcome::Failed(e.to_string())
            }
        }
    }

    fn schedule_auto_reply(&self, conversation: ConversationId) -> JoinHandle<()> {
        let documents = Arc::clone(&self.documents);
        let delay = self.settings.auto_reply_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let batch = WriteBatch::post(&conversation, NewMessage::system(AUTO_REPLY_TEXT));
            match documents.commit(batch).await {
                Ok(_) => debug!(conversation = %conversation, "auto-reply written"),
                Err(e) => warn!(conversation = %conversation, error = %e, "auto-reply failed"),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

/// Input height of an empty composer, in points.
pub const DEFAULT_INPUT_HEIGHT: u16 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachment: Option<PendingAttachment>,
    pub height: u16,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            text: String::new(),
            attachment: None,
            height: DEFAULT_INPUT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    InFlight,
}

#[derive(Debug)]
pub enum SendOutcome {
    Skipped(SkipReason),
    Sent(SendReport),
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Draft and send button of one input surface.
pub struct Composer {
    pipeline: Arc<SendPipeline>,
    draft: Mutex<Draft>,
    sending: AtomicBool,
}

impl Composer {
    pub fn new(pipeline: Arc<SendPipeline>) -> Self {
        Self {
            pipeline,
            draft: Mutex::new(Draft::default()),
            sending: AtomicBool::new(false),
        }
    }

    fn with_draft<R>(&self, f: impl FnOnce(&mut Draft) -> R) -> R {
        let mut draft = self.draft.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut draft)
    }

    pub fn draft(&self) -> Draft {
        self.with_draft(|d| d.clone())
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.with_draft(|d| d.text = text);
    }

    pub fn set_height(&self, height: u16) {
        self.with_draft(|d| d.height = height);
    }

    pub fn attach(&self, attachment: PendingAttachment) {
        self.with_draft(|d| d.attachment = Some(attachment));
    }

    pub fn remove_attachment(&self) -> Option<PendingAttachment> {
        self.with_draft(|d| d.attachment.take())
    }

    pub fn can_send(&self) -> bool {
        !self.is_sending() && self.with_draft(|d| is_sendable(&d.text, d.attachment.as_ref()))
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub fn state(&self) -> watch::Receiver<SendState> {
        self.pipeline.state()
    }

    /// Send the draft into `conversation`, or into a new one when `None`.
    pub async fn send(&self, conversation: Option<ConversationId>) -> Result<SendOutcome> {
        let (text, attachment) = self.with_draft(|d| (d.text.clone(), d.attachment.clone()));
        if !is_sendable(&text, attachment.as_ref()) {
            return Ok(SendOutcome::Skipped(SkipReason::Empty));
        }
        if self.sending.swap(true, Ordering::AcqRel) {
            debug!("send already in flight, ignoring");
            return Ok(SendOutcome::Skipped(SkipReason::InFlight));
        }
        let _in_flight = InFlight(&self.sending);

        let outcome = self
            .pipeline
            .send(SendRequest {
                text,
                attachment,
                conversation,
            })
            .await?;

        if matches!(outcome, SendOutcome::Sent(_)) {
            self.with_draft(|d| *d = Draft::default());
        }
        Ok(outcome)
    }
}
