//! The user's conversation list and the selected conversation.
//!
//! The selection is always a member of the current list or `None`.

use tracing::debug;

use vocalwise_shared::models::Conversation;
use vocalwise_shared::types::ConversationId;

use crate::error::{ChatError, Result};

#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    items: Vec<Conversation>,
    selected: Option<ConversationId>,
    /// Created by this client but not yet seen in a snapshot.
    pending: Option<ConversationId>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn selected(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        let id = self.selected.as_ref()?;
        self.items.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.items.iter().any(|c| &c.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the list with `snapshot`. Returns whether the selection
    /// changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Conversation>) -> bool {
        let previous = self.selected.clone();
        self.items = snapshot;

        if let Some(pending) = self.pending.take() {
            if self.contains(&pending) {
                self.selected = Some(pending);
            } else {
                self.pending = Some(pending);
            }
        }

        self.repair_selection();
        previous != self.selected
    }

    /// Select a conversation the user picked.
    pub fn select(&mut self, id: &ConversationId) -> Result<bool> {
        if !self.contains(id) {
            return Err(ChatError::NotFound(id.to_string()));
        }
        let changed = self.selected.as_ref() != Some(id);
        self.selected = Some(id.clone());
        self.pending = None;
        Ok(changed)
    }

    /// Make a conversation this client just created the selection, now if
    /// it is already listed, otherwise as soon as a snapshot carries it.
    pub fn adopt(&mut self, id: ConversationId) -> bool {
        if self.contains(&id) {
            let changed = self.selected.as_ref() != Some(&id);
            self.selected = Some(id);
            self.pending = None;
            changed
        } else {
            debug!(conversation = %id, "awaiting created conversation in snapshot");
            self.pending = Some(id);
            false
        }
    }

    /// Drop a conversation locally ahead of the next snapshot.
    pub fn remove(&mut self, id: &ConversationId) -> bool {
        let previous = self.selected.clone();
        self.items.retain(|c| &c.id != id);
        if self.pending.as_ref() == Some(id) {
            self.pending = None;
        }
        self.repair_selection();
        previous != self.selected
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.selected = None;
        self.pending = None;
    }

    fn repair_selection(&mut self) {
        let valid = self
            .selected
            .as_ref()
            .is_some_and(|id| self.items.iter().any(|c| &c.id == id));
        if !valid {
            self.selected = self.items.first().map(|c| c.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vocalwise_shared::types::UserId;

    fn conv(id: &str, age_secs: i64) -> Conversation {
        let at = Utc::now() - Duration::seconds(age_secs);
        Conversation {
            id: ConversationId::from(id),
            owner: UserId::new("u1"),
            last_message: id.to_string(),
            last_message_time: at,
            created_at: at,
        }
    }

    fn selection_is_valid(list: &ConversationList) -> bool {
        match list.selected() {
            None => true,
            Some(id) => list.contains(id),
        }
    }

    #[test]
    fn first_snapshot_selects_most_recent() {
        let mut list = ConversationList::new();
        assert!(list.apply_snapshot(vec![conv("a", 1), conv("b", 5)]));
        assert_eq!(list.selected(), Some(&ConversationId::from("a")));
    }

    #[test]
    fn selection_survives_reordering() {
        let mut list = ConversationList::new();
        list.apply_snapshot(vec![conv("a", 1), conv("b", 5)]);
        list.select(&ConversationId::from("b")).unwrap();

        assert!(!list.apply_snapshot(vec![conv("b", 0), conv("a", 1)]));
        assert_eq!(list.selected(), Some(&ConversationId::from("b")));
        assert_eq!(
            list.selected_conversation().map(|c| &c.id),
            Some(&ConversationId::from("b"))
        );
    }

    #[test]
    fn vanished_selection_falls_back() {
        let mut list = ConversationList::new();
        list.apply_snapshot(vec![conv("a", 1), conv("b", 5), conv("c", 9)]);
        list.select(&ConversationId::from("a")).unwrap();

        assert!(list.apply_snapshot(vec![conv("b", 5), conv("c", 9)]));
        assert_eq!(list.selected(), Some(&ConversationId::from("b")));

        assert!(list.apply_snapshot(vec![]));
        assert!(list.selected_conversation().is_none());
        assert_eq!(list.selected(), None);
    }

    #[test]
    fn unknown_selection_is_rejected() {
        let mut list = ConversationList::new();
        list.apply_snapshot(vec![conv("a", 1)]);
        assert!(matches!(
            list.select(&ConversationId::from("zzz")),
            Err(ChatError::NotFound(_))
        ));
        assert_eq!(list.selected(), Some(&ConversationId::from("a")));
    }

    #[test]
    fn adopted_conversation_selected_when_it_arrives() {
        let mut list = ConversationList::new();
        list.apply_snapshot(vec![conv("a", 1)]);

        assert!(!list.adopt(ConversationId::from("new")));
        assert_eq!(list.selected(), Some(&ConversationId::from("a")));

        assert!(list.apply_snapshot(vec![conv("new", 0), conv("a", 1)]));
        assert_eq!(list.selected(), Some(&ConversationId::from("new")));
    }

    #[test]
    fn remove_selected_picks_next() {
        let mut list = ConversationList::new();
        list.apply_snapshot(vec![conv("a", 1), conv("b", 5)]);
        assert!(list.remove(&ConversationId::from("a")));
        assert_eq!(list.selected(), Some(&ConversationId::from("b")));
    }

    #[test]
    fn selection_never_dangles() {
        let snapshots = vec![
            vec![conv("a", 1), conv("b", 2)],
            vec![conv("b", 2)],
            vec![],
            vec![conv("c", 0), conv("d", 3)],
            vec![conv("d", 3)],
            vec![conv("e", 0), conv("d", 3)],
            vec![],
        ];

        let mut list = ConversationList::new();
        for (i, snapshot) in snapshots.into_iter().enumerate() {
            if i == 3 {
                list.adopt(ConversationId::from("e"));
            }
            list.apply_snapshot(snapshot);
            assert!(selection_is_valid(&list), "dangling after snapshot {i}");
            if !list.is_empty() {
                assert!(list.selected().is_some());
            }
        }
    }
}
