//! # tandem-shared
//!
//! Identifiers, document addresses and document models shared by the store
//! and the sync client.

pub mod constants;
pub mod documents;
pub mod error;
pub mod models;
pub mod types;

pub use documents::{Collection, DocumentPath};
pub use error::TandemError;
pub use models::*;
pub use types::{ConversationId, UserId};
