use thiserror::Error;

/// Rejected user input.  Each variant carries enough to render an inline
/// message next to the field that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("The user name cannot be empty.")]
    EmptyDisplayName,

    #[error("The email cannot be empty.")]
    EmptyEmail,

    #[error("Please enter a valid email.")]
    InvalidEmail,

    #[error("The password cannot be empty.")]
    EmptyPassword,

    #[error("The password must be at least {min} characters long.")]
    PasswordTooShort { min: usize },

    #[error("The passwords do not match.")]
    PasswordMismatch,

    #[error("The email is already in use.")]
    EmailInUse,

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("You already have an empty chat. Use it or delete it before creating a new one.")]
    EmptyConversationExists,
}

/// The form field a validation failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    DisplayName,
    Email,
    Password,
    RepeatPassword,
    Message,
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            Self::EmptyMessage | Self::AttachmentTooLarge { .. } | Self::EmptyConversationExists => {
                Field::Message
            }
            Self::EmptyDisplayName => Field::DisplayName,
            Self::EmptyEmail | Self::InvalidEmail | Self::EmailInUse => Field::Email,
            Self::EmptyPassword | Self::PasswordTooShort { .. } => Field::Password,
            Self::PasswordMismatch => Field::RepeatPassword,
        }
    }
}
