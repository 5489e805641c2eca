//! View model for the messages of the selected conversation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use vocalwise_shared::constants::SYSTEM_USER_ID;
use vocalwise_shared::models::Message;
use vocalwise_shared::types::{ConversationId, MessageId, UserId};
use vocalwise_store::AnimationTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Author {
    #[serde(rename = "self")]
    SelfUser,
    Other,
    System,
}

impl Author {
    pub fn of(author: &UserId, me: &UserId) -> Self {
        if author == me {
            Self::SelfUser
        } else if author.as_str() == SYSTEM_USER_ID {
            Self::System
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub text: String,
    pub author: Author,
    pub author_label: String,
    pub created_at: DateTime<Utc>,
    pub attachment_name: Option<String>,
    pub attachment_url: Option<String>,
    /// System replies get a typing animation the first time they are shown.
    pub animate: bool,
}

impl MessageView {
    pub fn from_message(message: Message, me: &UserId, tracker: &AnimationTracker) -> Self {
        let author = Author::of(&message.author_user_id, me);
        let animate = author == Author::System && !tracker.has_been_animated(&message.id);
        Self {
            id: message.id,
            text: message.text,
            author,
            author_label: message.author_label,
            created_at: message.created_at,
            attachment_name: message.attachment_name,
            attachment_url: message.attachment_url,
            animate,
        }
    }
}

/// Messages of one conversation in delivery order.
#[derive(Debug, Default, Clone)]
pub struct MessageList {
    conversation: Option<ConversationId>,
    items: Vec<MessageView>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub fn items(&self) -> &[MessageView] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Point the view at another conversation (or none) and drop what it
    /// showed.
    pub fn switch_to(&mut self, conversation: Option<ConversationId>) {
        self.conversation = conversation;
        self.items.clear();
    }

    /// Replace the items with a snapshot of `conversation`. Snapshots for any
    /// other conversation are ignored.
    pub fn apply_snapshot(
        &mut self,
        conversation: &ConversationId,
        snapshot: Vec<Message>,
        me: &UserId,
        tracker: &AnimationTracker,
    ) -> bool {
        if self.conversation.as_ref() != Some(conversation) {
            return false;
        }
        self.items = snapshot
            .into_iter()
            .filter(|m| &m.conversation_id == conversation)
            .map(|m| MessageView::from_message(m, me, tracker))
            .collect();
        true
    }
}
