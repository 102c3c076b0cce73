//! Logical addresses of documents in the remote store.
//!
//! ```text
//! users/{userId}              -> User
//! userChats/{userId}          -> { conversationId: ConversationSummary, ... }
//! chats/{conversationId}      -> ChatDocument
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::{CHATS_COLLECTION, USERS_COLLECTION, USER_CHATS_COLLECTION};
use crate::error::TandemError;
use crate::types::{ConversationId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Users,
    UserChats,
    Chats,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => USERS_COLLECTION,
            Collection::UserChats => USER_CHATS_COLLECTION,
            Collection::Chats => CHATS_COLLECTION,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            USERS_COLLECTION => Some(Collection::Users),
            USER_CHATS_COLLECTION => Some(Collection::UserChats),
            CHATS_COLLECTION => Some(Collection::Chats),
            _ => None,
        }
    }
}

/// A single document address: a collection plus a document key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath {
    pub collection: Collection,
    pub key: String,
}

impl DocumentPath {
    pub fn user(id: &UserId) -> Self {
        Self {
            collection: Collection::Users,
            key: id.0.clone(),
        }
    }

    pub fn user_chats(id: &UserId) -> Self {
        Self {
            collection: Collection::UserChats,
            key: id.0.clone(),
        }
    }

    pub fn chat(id: &ConversationId) -> Self {
        Self {
            collection: Collection::Chats,
            key: id.0.clone(),
        }
    }

    /// Parse the `collection/key` form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, TandemError> {
        let (collection, key) = s
            .split_once('/')
            .ok_or_else(|| TandemError::InvalidPath(s.to_string()))?;
        let collection =
            Collection::from_name(collection).ok_or_else(|| TandemError::InvalidPath(s.to_string()))?;
        if key.is_empty() || key.contains('/') {
            return Err(TandemError::InvalidPath(s.to_string()));
        }
        Ok(Self {
            collection,
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection.name(), self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let path = DocumentPath::chat(&ConversationId::from("12"));
        assert_eq!(path.to_string(), "chats/12");
        assert_eq!(DocumentPath::parse("chats/12").unwrap(), path);
    }

    #[test]
    fn parse_rejects_unknown_collection() {
        assert!(DocumentPath::parse("groups/1").is_err());
        assert!(DocumentPath::parse("users").is_err());
        assert!(DocumentPath::parse("users/").is_err());
    }
}
