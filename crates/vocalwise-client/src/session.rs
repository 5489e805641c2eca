//! The chat screen's coordinator.
//!
//! `ChatSession` is the single owner of the conversation list, the selection
//! and the message list. Listener tasks and the send pipeline only post
//! [`SyncEvent`]s into its channel; every mutation happens in
//! [`ChatSession::next_update`] on the owner's task, so no state is shared.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vocalwise_shared::clock::Clock;
use vocalwise_shared::constants::NEW_CHAT_PLACEHOLDER;
use vocalwise_shared::models::{Conversation, Message, NewConversation, User};
use vocalwise_shared::types::{ConversationId, MessageId};
use vocalwise_shared::ValidationError;
use vocalwise_store::AnimationTracker;

use crate::analysis::AnalysisService;
use crate::backend::{BackendError, BlobStore, DocumentStore};
use crate::chat_list::ConversationList;
use crate::error::{ChatError, Result};
use crate::message_sync::{MessageList, MessageView};
use crate::platform::Confirmer;
use crate::send::{Composer, SendPipeline, SendSettings, SendState};
use crate::session_gate::SessionGate;
use crate::subscription::Subscription;

pub const DELETE_PROMPT: &str = "Delete this chat and all of its messages?";

/// Inputs to the coordinator. Snapshot events carry the generation of the
/// subscription that produced them so late deliveries from a replaced
/// listener are dropped.
#[derive(Debug)]
pub enum SyncEvent {
    Conversations {
        generation: u64,
        result: std::result::Result<Vec<Conversation>, BackendError>,
    },
    Messages {
        generation: u64,
        conversation: ConversationId,
        result: std::result::Result<Vec<Message>, BackendError>,
    },
    ConversationCreated(ConversationId),
}

/// What one processed event changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    pub conversations: bool,
    pub selection: bool,
    pub messages: bool,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        !(self.conversations || self.selection || self.messages)
    }
}

pub struct ChatSession {
    gate: Arc<SessionGate>,
    documents: Arc<dyn DocumentStore>,
    tracker: Arc<AnimationTracker>,
    pipeline: Arc<SendPipeline>,

    user: Option<User>,
    list: ConversationList,
    messages: MessageList,

    list_sub: Option<Subscription>,
    message_sub: Option<Subscription>,
    list_generation: u64,
    message_generation: u64,
    list_retried: bool,
    message_retried: bool,

    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl ChatSession {
    pub fn new(
        gate: Arc<SessionGate>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        tracker: Arc<AnimationTracker>,
        clock: Arc<dyn Clock>,
        settings: SendSettings,
        analysis: Option<Arc<dyn AnalysisService>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let created_tx = events_tx.clone();
        let mut pipeline = SendPipeline::new(gate.clone(), documents.clone(), blobs, clock, settings)
            .with_created_hook(Arc::new(move |id: &ConversationId| {
                let _ = created_tx.send(SyncEvent::ConversationCreated(id.clone()));
            }));
        if let Some(service) = analysis {
            pipeline = pipeline.with_analysis(service);
        }

        Self {
            gate,
            documents,
            tracker,
            pipeline: Arc::new(pipeline),
            user: None,
            list: ConversationList::new(),
            messages: MessageList::new(),
            list_sub: None,
            message_sub: None,
            list_generation: 0,
            message_generation: 0,
            list_retried: false,
            message_retried: false,
            events_tx,
            events_rx,
        }
    }

    // -- accessors ------------------------------------------------------

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.list.items()
    }

    pub fn selected(&self) -> Option<&ConversationId> {
        self.list.selected()
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.list.selected_conversation()
    }

    pub fn messages(&self) -> &[MessageView] {
        self.messages.items()
    }

    /// A composer bound to this session's pipeline.
    pub fn composer(&self) -> Composer {
        Composer::new(Arc::clone(&self.pipeline))
    }

    pub fn send_state(&self) -> tokio::sync::watch::Receiver<SendState> {
        self.pipeline.state()
    }

    pub fn mark_animated(&self, id: &MessageId) -> Result<bool> {
        Ok(self.tracker.mark_animated(id)?)
    }

    pub fn has_message_listener(&self) -> bool {
        self.message_sub.as_ref().is_some_and(Subscription::is_active)
    }

    // -- lifecycle ------------------------------------------------------

    /// Resolve the verified user and start listening to their conversations.
    pub async fn start(&mut self) -> Result<()> {
        let user = self.gate.verified_user().await?;
        info!(user = %user.id.short(), "chat session starting");
        self.user = Some(user);
        self.list_retried = false;
        self.open_conversations().await
    }

    /// Tear down both listeners and forget the session's state.
    pub async fn stop(&mut self) {
        if let Some(mut sub) = self.list_sub.take() {
            sub.shutdown().await;
        }
        if let Some(mut sub) = self.message_sub.take() {
            sub.shutdown().await;
        }
        self.list.clear();
        self.messages.switch_to(None);
        self.list_generation += 1;
        self.message_generation += 1;
    }

    pub async fn sign_out(&mut self) -> Result<()> {
        self.stop().await;
        self.user = None;
        self.gate.sign_out().await
    }

    async fn open_conversations(&mut self) -> Result<()> {
        let owner = self.user.as_ref().ok_or(ChatError::Unauthenticated)?.id.clone();
        if let Some(mut sub) = self.list_sub.take() {
            sub.shutdown().await;
        }

        self.list_generation += 1;
        let generation = self.list_generation;
        let stream = self.documents.subscribe_conversations(&owner).await?;
        self.list_sub = Some(Subscription::start(
            "conversations",
            stream,
            self.events_tx.clone(),
            move |result| SyncEvent::Conversations { generation, result },
        ));
        Ok(())
    }

    async fn open_messages(&mut self, conversation: ConversationId) {
        if let Some(mut sub) = self.message_sub.take() {
            sub.shutdown().await;
        }

        self.message_generation += 1;
        let generation = self.message_generation;
        match self.documents.subscribe_messages(&conversation).await {
            Ok(stream) => {
                let id = conversation.clone();
                self.message_sub = Some(Subscription::start(
                    "messages",
                    stream,
                    self.events_tx.clone(),
                    move |result| SyncEvent::Messages {
                        generation,
                        conversation: id.clone(),
                        result,
                    },
                ));
                debug!(conversation = %conversation, "watching messages");
            }
            Err(e) => warn!(conversation = %conversation, error = %e, "could not watch messages"),
        }
    }

    /// Point the message view at the current selection, replacing the
    /// listener when the target changed.
    async fn follow_selection(&mut self) {
        let target = self.list.selected().cloned();
        if self.messages.conversation() == target.as_ref() && self.has_message_listener() {
            return;
        }

        if let Some(mut sub) = self.message_sub.take() {
            sub.shutdown().await;
        }
        self.messages.switch_to(target.clone());
        self.message_retried = false;

        match target {
            Some(id) => self.open_messages(id).await,
            None => {
                self.message_generation += 1;
                debug!("no conversation selected");
            }
        }
    }

    // -- event processing -----------------------------------------------

    /// Wait for the next event and apply it.
    ///
    /// Not cancel-safe: inside `select!`, wait on [`next_event`] and pass the
    /// event to [`apply`] instead.
    ///
    /// [`next_event`]: Self::next_event
    /// [`apply`]: Self::apply
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let event = self.next_event().await?;
        Some(self.apply(event).await)
    }

    /// Dequeue the next event without applying it. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events_rx.recv().await
    }

    /// Apply one dequeued event.
    pub async fn apply(&mut self, event: SyncEvent) -> SessionUpdate {
        self.handle(event).await
    }

    /// Apply events until `done` holds or `timeout` passes. Returns whether
    /// `done` was reached.
    pub async fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done(self) {
            match tokio::time::timeout_at(deadline, self.next_update()).await {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return false,
            }
        }
        true
    }

    /// Apply every event already queued without waiting for more.
    pub async fn drain(&mut self) -> SessionUpdate {
        let mut total = SessionUpdate::default();
        while let Ok(event) = self.events_rx.try_recv() {
            let update = self.handle(event).await;
            total.conversations |= update.conversations;
            total.selection |= update.selection;
            total.messages |= update.messages;
        }
        total
    }

    async fn handle(&mut self, event: SyncEvent) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        match event {
            SyncEvent::Conversations { generation, result } => {
                if generation != self.list_generation {
                    return update;
                }
                match result {
                    Ok(snapshot) => {
                        // A live snapshot ends the denial episode.
                        self.list_retried = false;
                        update.conversations = true;
                        if self.list.apply_snapshot(snapshot) {
                            update.selection = true;
                            update.messages = true;
                            self.follow_selection().await;
                        }
                    }
                    Err(e) => self.conversations_failed(e, &mut update).await,
                }
            }

            SyncEvent::Messages {
                generation,
                conversation,
                result,
            } => {
                if generation != self.message_generation {
                    return update;
                }
                match result {
                    Ok(snapshot) => {
                        self.message_retried = false;
                        let Some(me) = self.user.as_ref().map(|u| u.id.clone()) else {
                            return update;
                        };
                        update.messages =
                            self.messages
                                .apply_snapshot(&conversation, snapshot, &me, &self.tracker);
                    }
                    Err(e) => self.messages_failed(conversation, e, &mut update).await,
                }
            }

            SyncEvent::ConversationCreated(id) => {
                if self.list.adopt(id) {
                    update.selection = true;
                    update.messages = true;
                    self.follow_selection().await;
                }
            }
        }
        update
    }

    async fn conversations_failed(&mut self, error: BackendError, update: &mut SessionUpdate) {
        if error == BackendError::PermissionDenied && !self.list_retried {
            self.list_retried = true;
            debug!("conversation listener denied, refreshing token");
            if self.gate.refresh_after_denied().await.is_ok() {
                match self.open_conversations().await {
                    Ok(()) => return,
                    Err(e) => warn!(error = %e, "could not re-open conversation listener"),
                }
            }
        } else {
            warn!(error = %error, "conversation listener failed");
            if error != BackendError::PermissionDenied {
                return;
            }
        }

        // Give up quietly: show an empty list rather than an error.
        if let Some(mut sub) = self.list_sub.take() {
            sub.shutdown().await;
        }
        self.list.clear();
        update.conversations = true;
        update.selection = true;
        update.messages = true;
        self.follow_selection().await;
    }

    async fn messages_failed(
        &mut self,
        conversation: ConversationId,
        error: BackendError,
        update: &mut SessionUpdate,
    ) {
        if error == BackendError::PermissionDenied && !self.message_retried {
            self.message_retried = true;
            debug!(conversation = %conversation, "message listener denied, refreshing token");
            if self.gate.refresh_after_denied().await.is_ok() {
                self.open_messages(conversation).await;
                return;
            }
        } else {
            warn!(conversation = %conversation, error = %error, "message listener failed");
            if error != BackendError::PermissionDenied {
                return;
            }
        }

        if let Some(mut sub) = self.message_sub.take() {
            sub.shutdown().await;
        }
        self.messages.switch_to(Some(conversation));
        update.messages = true;
    }

    // -- user actions ---------------------------------------------------

    pub async fn select(&mut self, id: &ConversationId) -> Result<()> {
        if self.list.select(id)? {
            self.follow_selection().await;
        }
        Ok(())
    }

    /// Start an empty conversation, unless the user already has one; in that
    /// case the empty one is selected instead.
    pub async fn new_conversation(&mut self) -> Result<ConversationId> {
        let user = self.gate.verified_user().await?;

        // Best effort: another client may create one between these reads.
        for conversation in self.documents.list_conversations(&user.id).await? {
            if self.documents.list_messages(&conversation.id).await?.is_empty() {
                debug!(conversation = %conversation.id, "reusing empty conversation");
                if self.list.adopt(conversation.id) {
                    self.follow_selection().await;
                }
                return Err(ValidationError::EmptyConversationExists.into());
            }
        }

        let id = self
            .documents
            .create_conversation(NewConversation {
                owner: user.id.clone(),
                last_message: NEW_CHAT_PLACEHOLDER.to_string(),
            })
            .await?;
        info!(conversation = %id, "conversation created");
        if self.list.adopt(id.clone()) {
            self.follow_selection().await;
        }
        Ok(id)
    }

    /// Delete a conversation and its messages after the user confirms.
    /// Returns `false` if they declined.
    pub async fn delete_conversation(
        &mut self,
        id: &ConversationId,
        confirmer: &dyn Confirmer,
    ) -> Result<bool> {
        if !confirmer.confirm(DELETE_PROMPT).await {
            debug!(conversation = %id, "delete declined");
            return Ok(false);
        }

        let messages = self.documents.list_messages(id).await?;
        for message in &messages {
            self.documents.delete_message(id, &message.id).await?;
        }
        self.documents.delete_conversation(id).await?;
        info!(conversation = %id, messages = messages.len(), "conversation deleted");

        if self.list.remove(id) {
            self.follow_selection().await;
        }
        Ok(true)
    }
}
