//! Domain models exchanged between the core and its collaborators.
//!
//! Every struct derives `Serialize` and `Deserialize` so the same values can be
//! cached locally and handed to a UI layer unchanged.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{SYSTEM_AUTHOR_LABEL, SYSTEM_USER_ID};
use crate::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Identity issued by the auth provider.  Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl User {
    /// Name stamped on messages: display name, else email.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.email,
        }
    }
}

/// Profile document written at registration (`users/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Changes applied to the auth provider's profile of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A thread of messages owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub owner: UserId,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a conversation; timestamps are server-assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub owner: UserId,
    pub last_message: String,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted chat message.  Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub text: String,
    /// Server-assigned; the ordering key.
    pub created_at: DateTime<Utc>,
    pub author_user_id: UserId,
    pub author_label: String,
    pub attachment_name: Option<String>,
    pub attachment_url: Option<String>,
}

/// Fields supplied when appending a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub author_user_id: UserId,
    pub author_label: String,
    pub attachment_name: Option<String>,
    pub attachment_url: Option<String>,
}

impl NewMessage {
    /// A message authored by `user`.
    pub fn from_user(user: &User, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author_user_id: user.id.clone(),
            author_label: user.label().to_string(),
            attachment_name: None,
            attachment_url: None,
        }
    }

    /// A message authored by the fixed system identity.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author_user_id: UserId::new(SYSTEM_USER_ID),
            author_label: SYSTEM_AUTHOR_LABEL.to_string(),
            attachment_name: None,
            attachment_url: None,
        }
    }

    pub fn with_attachment(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.attachment_name = Some(name.into());
        self.attachment_url = Some(url.into());
        self
    }

    /// Text recorded as the conversation's `last_message`.
    pub fn preview(&self) -> String {
        if self.text.is_empty() {
            self.attachment_name.clone().unwrap_or_default()
        } else {
            self.text.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Broad class of an attached file, decided from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentKind {
    Document,
    Media,
    Other,
}

impl AttachmentKind {
    pub fn from_file_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" | "doc" | "docx" | "ppt" | "pptx" => Self::Document,
            "mp4" | "mov" => Self::Media,
            _ => Self::Other,
        }
    }
}

/// A file picked in the input surface but not yet sent.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub file_name: String,
    pub bytes: Bytes,
}

impl PendingAttachment {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_file_name(&self.file_name)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for PendingAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAttachment")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}
