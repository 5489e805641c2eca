//! Cached credential: the last signed-in [`User`], read at startup so the UI
//! can render before the auth provider answers.

use std::sync::Arc;

use vocalwise_shared::constants::KEY_CACHED_USER;
use vocalwise_shared::models::User;

use crate::error::{Result, StoreError};
use crate::kv::{get_json, set_json, KeyValueStore};

#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The cached user, if any.  A corrupt entry is dropped and reported as
    /// absent so startup falls through to the live auth check.
    pub fn load(&self) -> Result<Option<User>> {
        match get_json::<User>(self.store.as_ref(), KEY_CACHED_USER) {
            Ok(user) => Ok(user),
            Err(StoreError::Corrupt { source, .. }) => {
                tracing::warn!(error = %source, "discarding corrupt cached credential");
                self.clear()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, user: &User) -> Result<()> {
        set_json(self.store.as_ref(), KEY_CACHED_USER, user)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(KEY_CACHED_USER)
    }
}
