//! Input checks run before any collaborator is contacted.

use crate::constants::{MAX_ATTACHMENT_SIZE, MIN_PASSWORD_LEN};
use crate::error::ValidationError;
use crate::models::PendingAttachment;

/// `local@domain.tld` with no whitespace anywhere.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::EmptyEmail);
    }
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

/// Text is sendable when it has content after trimming, or a file rides along.
pub fn is_sendable(text: &str, attachment: Option<&PendingAttachment>) -> bool {
    !text.trim().is_empty() || attachment.is_some()
}

pub fn validate_attachment(attachment: &PendingAttachment) -> Result<(), ValidationError> {
    if attachment.len() > MAX_ATTACHMENT_SIZE {
        return Err(ValidationError::AttachmentTooLarge {
            size: attachment.len(),
            max: MAX_ATTACHMENT_SIZE,
        });
    }
    Ok(())
}

/// Fields of the sign-up screen.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub display_name: String,
    pub email: String,
    pub password: String,
    pub repeat_password: String,
}

impl RegistrationForm {
    /// Check every field, returning all failures (one per field at most).
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.display_name.trim().is_empty() {
            errors.push(ValidationError::EmptyDisplayName);
        }

        if let Err(e) = validate_email(self.email.trim()) {
            errors.push(e);
        }

        if self.password.is_empty() {
            errors.push(ValidationError::EmptyPassword);
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_LEN,
            });
        }

        if self.repeat_password.is_empty() || self.password != self.repeat_password {
            errors.push(ValidationError::PasswordMismatch);
        }

        errors
    }
}
