//! Collaborator seams.
//!
//! The core never talks to a concrete Backend-as-a-Service.  It consumes the
//! auth provider, document store and blob store through the traits below, so
//! the same orchestration runs against the in-memory backend in tests and a
//! hosted platform in production.

pub mod fs_blob;
pub mod http_blob;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

use vocalwise_shared::models::{
    Conversation, Message, NewConversation, NewMessage, ProfileUpdate, User, UserProfile,
};
use vocalwise_shared::types::{AuthToken, ConversationId, MessageId, UserId};

/// Failures reported by a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("not signed in")]
    Unauthenticated,

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("email already in use")]
    EmailInUse,

    #[error("no account for this email")]
    UserNotFound,

    #[error("request timed out")]
    Timeout,

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Push-based stream of full snapshots.  Dropping it ends the subscription.
pub type SnapshotStream<T> = BoxStream<'static, Result<Vec<T>, BackendError>>;

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, BackendError>;

    async fn create_user(&self, email: &str, password: &str) -> Result<User, BackendError>;

    /// Update the signed-in user's profile and return the reloaded user.
    async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, BackendError>;

    async fn current_user(&self) -> Result<Option<User>, BackendError>;

    async fn refresh_token(&self, force: bool) -> Result<AuthToken, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set `last_message` and stamp `last_message_time` with the batch time.
    TouchConversation {
        conversation: ConversationId,
        last_message: String,
    },
    /// Append a message stamped with the batch time.
    AppendMessage {
        conversation: ConversationId,
        message: NewMessage,
    },
}

/// Writes applied atomically: every op or none, all sharing one server time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` and point the conversation's metadata at it.
    pub fn post(conversation: &ConversationId, message: NewMessage) -> Self {
        Self::new()
            .touch(conversation, message.preview())
            .append(conversation, message)
    }

    pub fn touch(mut self, conversation: &ConversationId, last_message: impl Into<String>) -> Self {
        self.ops.push(BatchOp::TouchConversation {
            conversation: conversation.clone(),
            last_message: last_message.into(),
        });
        self
    }

    pub fn append(mut self, conversation: &ConversationId, message: NewMessage) -> Self {
        self.ops.push(BatchOp::AppendMessage {
            conversation: conversation.clone(),
            message,
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub committed_at: DateTime<Utc>,
    /// Ids of appended messages, in op order.
    pub message_ids: Vec<MessageId>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Conversations owned by `owner`, most recently active first.
    async fn subscribe_conversations(
        &self,
        owner: &UserId,
    ) -> Result<SnapshotStream<Conversation>, BackendError>;

    /// Messages of `conversation`, oldest first.
    async fn subscribe_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<SnapshotStream<Message>, BackendError>;

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<ConversationId, BackendError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, BackendError>;

    /// Create or overwrite a conversation at a known id.
    async fn put_conversation(
        &self,
        id: &ConversationId,
        new: NewConversation,
    ) -> Result<(), BackendError>;

    async fn commit(&self, batch: WriteBatch) -> Result<BatchReceipt, BackendError>;

    async fn list_conversations(&self, owner: &UserId) -> Result<Vec<Conversation>, BackendError>;

    async fn list_messages(&self, conversation: &ConversationId)
        -> Result<Vec<Message>, BackendError>;

    async fn delete_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> Result<(), BackendError>;

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), BackendError>;

    async fn put_user_profile(&self, profile: &UserProfile) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

/// Handle to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
    pub size: usize,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<BlobRef, BackendError>;

    async fn download_url(&self, blob: &BlobRef) -> Result<String, BackendError>;
}
