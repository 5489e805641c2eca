//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration against the in-memory backend.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::login_guard::LockoutPolicy;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding the local SQLite store.
    /// Env: `VOCALWISE_DATA_DIR`
    /// Default: platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Endpoint receiving media attachments for analysis.
    /// Env: `ANALYSIS_ENDPOINT`
    /// Default: none (analysis disabled).
    pub analysis_endpoint: Option<String>,

    /// Blob container URL for attachment uploads.
    /// Env: `BLOB_CONTAINER_URL`
    /// Default: none (uploads go to the in-process store).
    pub blob_container_url: Option<String>,

    /// Local directory for attachment uploads when no container is set.
    /// Env: `BLOB_DIR`
    /// Default: none
    pub blob_dir: Option<PathBuf>,

    /// Shared-access token appended to upload requests.
    /// Env: `BLOB_SAS_TOKEN`
    pub blob_sas_token: Option<String>,

    /// Env: `UPLOAD_TIMEOUT_SECS`
    /// Default: 60
    pub upload_timeout: Duration,

    /// Env: `ANALYSIS_TIMEOUT_SECS`
    /// Default: 120
    pub analysis_timeout: Duration,

    /// Whether a canned system reply follows each user message.
    /// Env: `AUTO_REPLY_ENABLED` (true/false)
    /// Default: `true`
    pub auto_reply_enabled: bool,

    /// Env: `AUTO_REPLY_DELAY_MS`
    /// Default: 1000
    pub auto_reply_delay: Duration,

    /// Existence checks made after creating a conversation before writing
    /// into it.
    /// Env: `SETTLE_RETRIES`
    /// Default: 5
    pub settle_retries: u32,

    /// Env: `SETTLE_INTERVAL_MS`
    /// Default: 100
    pub settle_interval: Duration,

    /// Failed-login lockout policy.
    pub lockout: LockoutPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            analysis_endpoint: None,
            blob_container_url: None,
            blob_dir: None,
            blob_sas_token: None,
            upload_timeout: Duration::from_secs(60),
            analysis_timeout: Duration::from_secs(120),
            auto_reply_enabled: true,
            auto_reply_delay: Duration::from_millis(1000),
            settle_retries: 5,
            settle_interval: Duration::from_millis(100),
            lockout: LockoutPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = non_empty(lookup("VOCALWISE_DATA_DIR")) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        config.analysis_endpoint = non_empty(lookup("ANALYSIS_ENDPOINT"));
        config.blob_container_url = non_empty(lookup("BLOB_CONTAINER_URL"));
        config.blob_dir = non_empty(lookup("BLOB_DIR")).map(PathBuf::from);
        config.blob_sas_token = non_empty(lookup("BLOB_SAS_TOKEN"));

        if let Some(secs) = parse_var::<u64>(&lookup, "UPLOAD_TIMEOUT_SECS") {
            config.upload_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "ANALYSIS_TIMEOUT_SECS") {
            config.analysis_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("AUTO_REPLY_ENABLED") {
            config.auto_reply_enabled = val != "false" && val != "0";
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "AUTO_REPLY_DELAY_MS") {
            config.auto_reply_delay = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<u32>(&lookup, "SETTLE_RETRIES") {
            config.settle_retries = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "SETTLE_INTERVAL_MS") {
            config.settle_interval = Duration::from_millis(ms);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
