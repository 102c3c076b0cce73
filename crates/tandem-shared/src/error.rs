use thiserror::Error;

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("Identifier must not be empty")]
    EmptyId,

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Message has neither text nor image")]
    EmptyMessage,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
