use std::time::Duration;

use thiserror::Error;

use vocalwise_shared::ValidationError;
use vocalwise_store::StoreError;

use crate::backend::BackendError;

/// Every failure a user-initiated action can end in.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("permission denied")]
    PermissionDenied,

    #[error("attachment upload failed: {0}")]
    UploadFailed(String),

    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("too many failed attempts, locked for {}s", .remaining.as_secs())]
    RateLimited { remaining: Duration },

    #[error("authentication failed: {0}")]
    AuthFailed(BackendError),

    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error("local storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<BackendError> for ChatError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::PermissionDenied => Self::PermissionDenied,
            BackendError::Unauthenticated => Self::Unauthenticated,
            BackendError::NotFound(what) => Self::NotFound(what),
            other => Self::Backend(other),
        }
    }
}

impl ChatError {
    /// Inline text shown next to the control that triggered the action.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated => "Your session has expired. Please sign in again.".into(),
            Self::PermissionDenied => "You do not have access to this chat.".into(),
            Self::UploadFailed(_) => "The file could not be uploaded. Please try again.".into(),
            Self::AnalysisFailed(_) => "The file could not be analysed right now.".into(),
            Self::NotFound(_) => "This chat no longer exists.".into(),
            Self::ValidationFailed(v) => v.to_string(),
            Self::RateLimited { remaining } => {
                let secs = remaining.as_secs();
                format!(
                    "Too many failed attempts. Try again in {}:{:02}.",
                    secs / 60,
                    secs % 60
                )
            }
            Self::AuthFailed(BackendError::UserNotFound) => {
                "There is no account with this email.".into()
            }
            Self::AuthFailed(BackendError::EmailInUse) => ValidationError::EmailInUse.to_string(),
            Self::AuthFailed(_) => "Incorrect email or password.".into(),
            Self::Backend(_) | Self::Store(_) => "Something went wrong. Please try again.".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
