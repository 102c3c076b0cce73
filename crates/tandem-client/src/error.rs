use tandem_shared::{ConversationId, TandemError, UserId};
use tandem_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Cannot open a conversation with yourself")]
    SelfConversation,

    #[error("Unknown user: {0}")]
    UnknownPeer(UserId),

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] TandemError),

    /// A pushed snapshot entry was malformed or referenced something missing.
    /// The entry is skipped; the subscription keeps running.
    #[error("Skipped entry in {path}: {reason}")]
    Transient { path: String, reason: String },

    /// A persist write failed after all retries.
    #[error("Write for conversation {conversation_id} failed: {source}")]
    WriteFailure {
        conversation_id: ConversationId,
        source: StoreError,
    },

    /// The session that issued the operation ended before it settled.
    #[error("Session ended before the operation settled")]
    AuthBoundary,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync loop has stopped")]
    Closed,
}

impl SyncError {
    pub fn transient(path: impl ToString, reason: impl ToString) -> Self {
        Self::Transient {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
