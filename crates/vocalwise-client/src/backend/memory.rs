//! In-process implementation of every collaborator.
//!
//! Behaves like a hosted realtime backend as far as the core can tell: full
//! snapshots are pushed to every live subscriber after each write, timestamps
//! are assigned on the "server" and strictly increase, and batches apply
//! atomically.  Fault switches let tests provoke the failure paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use vocalwise_shared::models::{
    Conversation, Message, NewConversation, ProfileUpdate, User, UserProfile,
};
use vocalwise_shared::types::{AuthToken, ConversationId, MessageId, UserId};

use super::{
    AuthProvider, BackendError, BatchOp, BatchReceipt, BlobRef, BlobStore, DocumentStore,
    SnapshotStream, WriteBatch,
};

type SnapshotSender<T> = mpsc::UnboundedSender<Result<Vec<T>, BackendError>>;

struct Watcher<K, T> {
    key: K,
    tx: SnapshotSender<T>,
}

struct Account {
    password: String,
    user: User,
}

#[derive(Default)]
struct Faults {
    failing_uploads: usize,
    denied_subscriptions: usize,
    denied_commits: usize,
    lagging_reads: usize,
    token_refresh_fails: bool,
    latency: Duration,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<String>,
    token_refreshes: usize,
    password_resets: Vec<String>,

    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    profiles: HashMap<UserId, UserProfile>,
    blobs: HashMap<String, Bytes>,

    list_watchers: Vec<Watcher<UserId, Conversation>>,
    message_watchers: Vec<Watcher<ConversationId, Message>>,

    last_time: Option<DateTime<Utc>>,
    faults: Faults,
}

impl Inner {
    /// Server clock: wall time, bumped so successive calls strictly increase.
    fn server_time(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_time {
            if now <= last {
                now = last + chrono::Duration::milliseconds(1);
            }
        }
        self.last_time = Some(now);
        now
    }

    fn session_user(&self) -> Option<&Account> {
        self.session.as_ref().and_then(|email| self.accounts.get(email))
    }

    fn conversations_of(&self, owner: &UserId) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|c| &c.owner == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        list
    }

    fn messages_of(&self, conversation: &ConversationId) -> Vec<Message> {
        self.messages.get(conversation).cloned().unwrap_or_default()
    }

    fn notify_owner(&mut self, owner: &UserId) {
        let snapshot = self.conversations_of(owner);
        self.list_watchers
            .retain(|w| &w.key != owner || w.tx.send(Ok(snapshot.clone())).is_ok());
    }

    fn notify_conversation(&mut self, conversation: &ConversationId) {
        let snapshot = self.messages_of(conversation);
        self.message_watchers
            .retain(|w| &w.key != conversation || w.tx.send(Ok(snapshot.clone())).is_ok());
    }
}

/// Auth provider, document store and blob store in one process.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        let latency = self.lock().faults.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Register an account without signing in.
    pub fn add_account(&self, email: &str, password: &str, display_name: Option<&str>) -> User {
        let user = User {
            id: UserId::new(Uuid::new_v4().simple().to_string()),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            photo_url: None,
        };
        self.lock().accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    // -- fault injection ------------------------------------------------

    pub fn fail_next_uploads(&self, n: usize) {
        self.lock().faults.failing_uploads = n;
    }

    pub fn deny_next_subscriptions(&self, n: usize) {
        self.lock().faults.denied_subscriptions = n;
    }

    pub fn deny_next_commits(&self, n: usize) {
        self.lock().faults.denied_commits = n;
    }

    /// Fail every live conversation listener with a permission error and
    /// close it, as a backend does when the token goes stale mid-session.
    pub fn revoke_conversation_listeners(&self) {
        for watcher in self.lock().list_watchers.drain(..) {
            let _ = watcher.tx.send(Err(BackendError::PermissionDenied));
        }
    }

    pub fn revoke_message_listeners(&self) {
        for watcher in self.lock().message_watchers.drain(..) {
            let _ = watcher.tx.send(Err(BackendError::PermissionDenied));
        }
    }

    /// The next `n` conversation reads report "missing", as a lagging replica would.
    pub fn lag_next_reads(&self, n: usize) {
        self.lock().faults.lagging_reads = n;
    }

    pub fn set_token_refresh_failing(&self, failing: bool) {
        self.lock().faults.token_refresh_fails = failing;
    }

    /// Delay applied before every write and upload.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().faults.latency = latency;
    }

    // -- inspection -----------------------------------------------------

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().conversations.get(id).cloned()
    }

    pub fn conversations_of(&self, owner: &UserId) -> Vec<Conversation> {
        self.lock().conversations_of(owner)
    }

    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.lock().messages_of(conversation)
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.values().map(Vec::len).sum()
    }

    pub fn profile(&self, user: &UserId) -> Option<UserProfile> {
        self.lock().profiles.get(user).cloned()
    }

    pub fn blob_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().blobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn password_resets(&self) -> Vec<String> {
        self.lock().password_resets.clone()
    }

    pub fn token_refreshes(&self) -> usize {
        self.lock().token_refreshes
    }

    pub fn active_conversation_listeners(&self) -> usize {
        self.lock()
            .list_watchers
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }

    pub fn active_message_listeners(&self) -> usize {
        self.lock()
            .message_watchers
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }
}

fn into_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<Result<Vec<T>, BackendError>>,
) -> SnapshotStream<T> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        .boxed()
}

/// A stream that yields one permission error and ends.
fn denied<T: Send + 'static>() -> SnapshotStream<T> {
    futures::stream::iter(vec![Err(BackendError::PermissionDenied)]).boxed()
}

#[async_trait]
impl AuthProvider for InMemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, BackendError> {
        let key = email.trim().to_ascii_lowercase();
        let mut inner = self.lock();
        let user = match inner.accounts.get(&key) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(BackendError::InvalidCredentials),
        };
        inner.session = Some(key);
        Ok(user)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<User, BackendError> {
        let key = email.trim().to_ascii_lowercase();
        if self.lock().accounts.contains_key(&key) {
            return Err(BackendError::EmailInUse);
        }
        let user = self.add_account(email.trim(), password, None);
        self.lock().session = Some(key);
        Ok(user)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, BackendError> {
        let mut inner = self.lock();
        let key = inner.session.clone().ok_or(BackendError::Unauthenticated)?;
        let account = inner
            .accounts
            .get_mut(&key)
            .ok_or(BackendError::Unauthenticated)?;
        if let Some(name) = &update.display_name {
            account.user.display_name = Some(name.clone());
        }
        if let Some(url) = &update.photo_url {
            account.user.photo_url = Some(url.clone());
        }
        Ok(account.user.clone())
    }

    async fn current_user(&self) -> Result<Option<User>, BackendError> {
        Ok(self.lock().session_user().map(|a| a.user.clone()))
    }

    async fn refresh_token(&self, _force: bool) -> Result<AuthToken, BackendError> {
        let mut inner = self.lock();
        inner.token_refreshes += 1;
        if inner.faults.token_refresh_fails {
            return Err(BackendError::Unauthenticated);
        }
        let account = inner.session_user().ok_or(BackendError::Unauthenticated)?;
        Ok(AuthToken(format!(
            "{}.{}",
            account.user.id,
            Uuid::new_v4().simple()
        )))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.lock().session = None;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), BackendError> {
        let key = email.trim().to_ascii_lowercase();
        let mut inner = self.lock();
        if !inner.accounts.contains_key(&key) {
            return Err(BackendError::UserNotFound);
        }
        inner.password_resets.push(key);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryBackend {
    async fn subscribe_conversations(
        &self,
        owner: &UserId,
    ) -> Result<SnapshotStream<Conversation>, BackendError> {
        let mut inner = self.lock();
        if inner.faults.denied_subscriptions > 0 {
            inner.faults.denied_subscriptions -= 1;
            return Ok(denied());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(inner.conversations_of(owner)));
        inner.list_watchers.push(Watcher {
            key: owner.clone(),
            tx,
        });
        debug!(owner = %owner.short(), "conversation listener attached");
        Ok(into_stream(rx))
    }

    async fn subscribe_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<SnapshotStream<Message>, BackendError> {
        let mut inner = self.lock();
        if inner.faults.denied_subscriptions > 0 {
            inner.faults.denied_subscriptions -= 1;
            return Ok(denied());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(inner.messages_of(conversation)));
        inner.message_watchers.push(Watcher {
            key: conversation.clone(),
            tx,
        });
        debug!(conversation = %conversation, "message listener attached");
        Ok(into_stream(rx))
    }

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<ConversationId, BackendError> {
        self.delay().await;
        let id = ConversationId::generate();
        self.put_conversation(&id, new).await?;
        Ok(id)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, BackendError> {
        let mut inner = self.lock();
        if inner.faults.lagging_reads > 0 {
            inner.faults.lagging_reads -= 1;
            return Ok(None);
        }
        Ok(inner.conversations.get(id).cloned())
    }

    async fn put_conversation(
        &self,
        id: &ConversationId,
        new: NewConversation,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let now = inner.server_time();
        let owner = new.owner.clone();
        inner.conversations.insert(
            id.clone(),
            Conversation {
                id: id.clone(),
                owner: new.owner,
                last_message: new.last_message,
                last_message_time: now,
                created_at: now,
            },
        );
        inner.messages.entry(id.clone()).or_default();
        inner.notify_owner(&owner);
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<BatchReceipt, BackendError> {
        self.delay().await;
        let mut inner = self.lock();

        if inner.faults.denied_commits > 0 {
            inner.faults.denied_commits -= 1;
            return Err(BackendError::PermissionDenied);
        }

        // Validate every target before touching anything.
        for op in batch.ops() {
            let (BatchOp::TouchConversation { conversation, .. }
            | BatchOp::AppendMessage { conversation, .. }) = op;
            if !inner.conversations.contains_key(conversation) {
                return Err(BackendError::NotFound(conversation.to_string()));
            }
        }

        let now = inner.server_time();
        let mut message_ids = Vec::new();
        let mut owners = Vec::new();
        let mut touched = Vec::new();

        for op in batch.into_ops() {
            match op {
                BatchOp::TouchConversation {
                    conversation,
                    last_message,
                } => {
                    if let Some(c) = inner.conversations.get_mut(&conversation) {
                        c.last_message = last_message;
                        c.last_message_time = now;
                        owners.push(c.owner.clone());
                    }
                }
                BatchOp::AppendMessage {
                    conversation,
                    message,
                } => {
                    let id = MessageId::generate();
                    inner.messages.entry(conversation.clone()).or_default().push(Message {
                        id: id.clone(),
                        conversation_id: conversation.clone(),
                        text: message.text,
                        created_at: now,
                        author_user_id: message.author_user_id,
                        author_label: message.author_label,
                        attachment_name: message.attachment_name,
                        attachment_url: message.attachment_url,
                    });
                    message_ids.push(id);
                    touched.push(conversation);
                }
            }
        }

        for owner in owners {
            inner.notify_owner(&owner);
        }
        for conversation in touched {
            inner.notify_conversation(&conversation);
        }

        Ok(BatchReceipt {
            committed_at: now,
            message_ids,
        })
    }

    async fn list_conversations(&self, owner: &UserId) -> Result<Vec<Conversation>, BackendError> {
        Ok(self.lock().conversations_of(owner))
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, BackendError> {
        Ok(self.lock().messages_of(conversation))
    }

    async fn delete_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if let Some(messages) = inner.messages.get_mut(conversation) {
            messages.retain(|m| &m.id != message);
        }
        inner.notify_conversation(conversation);
        Ok(())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let Some(removed) = inner.conversations.remove(id) else {
            return Ok(());
        };
        inner.messages.remove(id);
        inner.notify_conversation(id);
        inner.notify_owner(&removed.owner);
        Ok(())
    }

    async fn put_user_profile(&self, profile: &UserProfile) -> Result<(), BackendError> {
        self.lock()
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<BlobRef, BackendError> {
        self.delay().await;
        let mut inner = self.lock();
        if inner.faults.failing_uploads > 0 {
            inner.faults.failing_uploads -= 1;
            return Err(BackendError::Unavailable("upload rejected".into()));
        }
        let size = bytes.len();
        inner.blobs.insert(key.to_string(), bytes);
        Ok(BlobRef {
            key: key.to_string(),
            size,
        })
    }

    async fn download_url(&self, blob: &BlobRef) -> Result<String, BackendError> {
        if self.lock().blobs.contains_key(&blob.key) {
            Ok(format!("memory://{}", blob.key))
        } else {
            Err(BackendError::NotFound(blob.key.clone()))
        }
    }
}
