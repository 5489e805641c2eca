//! Set of message ids whose entry animation has already played.
//!
//! Constructed once at startup with [`AnimationTracker::load`] and handed to
//! whichever view needs it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use vocalwise_shared::constants::KEY_ANIMATED_MESSAGES;
use vocalwise_shared::types::MessageId;

use crate::error::{Result, StoreError};
use crate::kv::{get_json, set_json, KeyValueStore};

pub struct AnimationTracker {
    store: Arc<dyn KeyValueStore>,
    animated: Mutex<HashSet<MessageId>>,
}

impl AnimationTracker {
    /// Read the persisted set.  Failures start from an empty set.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let animated = match get_json::<Vec<MessageId>>(store.as_ref(), KEY_ANIMATED_MESSAGES) {
            Ok(ids) => ids.unwrap_or_default().into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load animation state");
                HashSet::new()
            }
        };

        Self {
            store,
            animated: Mutex::new(animated),
        }
    }

    pub fn has_been_animated(&self, id: &MessageId) -> bool {
        self.animated
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    /// Record `id`.  Returns `false` if it was already present, in which case
    /// nothing is written.
    pub fn mark_animated(&self, id: &MessageId) -> Result<bool> {
        let snapshot: Vec<MessageId> = {
            let mut set = self.animated.lock().map_err(|_| StoreError::Poisoned)?;
            if !set.insert(id.clone()) {
                return Ok(false);
            }
            set.iter().cloned().collect()
        };

        set_json(self.store.as_ref(), KEY_ANIMATED_MESSAGES, &snapshot)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.animated.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
