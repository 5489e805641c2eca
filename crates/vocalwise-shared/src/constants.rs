/// Application name
pub const APP_NAME: &str = "VocalWise";

/// User id stamped on automated replies and analysis results
pub const SYSTEM_USER_ID: &str = "vocalwise";

/// Author label shown for automated messages
pub const SYSTEM_AUTHOR_LABEL: &str = "VocalWise";

/// Failed logins that trigger a lockout
pub const MAX_ATTEMPTS: usize = 3;

/// Trailing window over which failed logins are counted, in seconds
pub const ATTEMPT_WINDOW_SECS: i64 = 60;

/// Lockout length once the threshold is reached, in seconds
pub const LOCKOUT_DURATION_SECS: i64 = 5 * 60;

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 6;

/// Key prefix for message attachments in blob storage
pub const UPLOAD_KEY_PREFIX: &str = "uploads";

/// Key prefix for profile pictures in blob storage
pub const AVATAR_KEY_PREFIX: &str = "avatars";

/// `last_message` of a conversation created through "new chat"
pub const NEW_CHAT_PLACEHOLDER: &str = "New chat";

/// Canned notice written by the automated reply
pub const AUTO_REPLY_TEXT: &str = "I am still in development and cannot give you an answer right now. \
I hope we can work together in the future!";

/// Fallback when the analysis endpoint returns no text
pub const ANALYSIS_FALLBACK_TEXT: &str = "No analysis was found.";

/// Persistence keys (local key-value store)
pub const KEY_CACHED_USER: &str = "user";
pub const KEY_LOGIN_ATTEMPTS: &str = "loginAttempts";
pub const KEY_LOGIN_LOCKOUT: &str = "loginLockout";
pub const KEY_ANIMATED_MESSAGES: &str = "animatedMessages";

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 50 * 1024 * 1024;
