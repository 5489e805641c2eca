//! # vocalwise-store
//!
//! Local persistence for the VocalWise client, backed by SQLite.
//!
//! Everything the client keeps on the device is a small JSON value under a
//! well-known key: the cached credential, the failed-login window and the
//! set of already animated messages.  The crate exposes the
//! [`KeyValueStore`] seam plus typed helpers for each of those values.

pub mod animations;
pub mod credentials;
pub mod database;
pub mod kv;
pub mod login_attempts;
pub mod migrations;

mod error;

pub use animations::AnimationTracker;
pub use credentials::CredentialCache;
pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryStore};
pub use login_attempts::LoginAttemptWindow;
