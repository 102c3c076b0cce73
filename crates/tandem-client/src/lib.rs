//! # tandem-client
//!
//! Keeps the conversation list, message logs, unread badges and the active
//! conversation of a one-to-one chat client in step with a push-based
//! document store.

pub mod auth;
pub mod config;
pub mod conversation_index;
pub mod directory;
pub mod error;
pub mod message_log;
pub mod orchestrator;
pub mod selection;
pub mod unread;
pub mod view;
pub mod writes;

pub use auth::{AuthProvider, AuthState};
pub use config::ClientConfig;
pub use error::{Result, SyncError};
pub use message_log::{LoggedMessage, SyncState};
pub use orchestrator::{SyncHandle, SyncOrchestrator};
pub use view::{ConversationRow, FailureKind, PeerView, SyncFailure, SyncView};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Calling it again is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tandem_client=debug,tandem_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
