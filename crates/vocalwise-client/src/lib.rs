pub mod analysis;
pub mod app;
pub mod backend;
pub mod chat_list;
pub mod config;
pub mod error;
pub mod login_guard;
pub mod message_sync;
pub mod platform;
pub mod send;
pub mod session;
pub mod session_gate;
pub mod subscription;

pub use app::{App, Collaborators};
pub use config::ClientConfig;
pub use error::{ChatError, Result};
pub use session::ChatSession;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("vocalwise_client=debug,vocalwise_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
