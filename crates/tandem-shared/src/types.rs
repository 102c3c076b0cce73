use serde::{Deserialize, Serialize};

use crate::error::TandemError;

/// Opaque user identifier as issued by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, TandemError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TandemError::EmptyId);
        }
        if id.contains('/') {
            return Err(TandemError::InvalidId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a one-to-one conversation.
///
/// Always built through [`ConversationId::canonical`] in client code so that
/// both participants address the same `chats/{id}` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Concatenate the two participant ids in ascending lexicographic order.
    ///
    /// The result does not depend on which participant initiates.
    pub fn canonical(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}{}", lo.0, hi.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_id_is_symmetric() {
        let pairs = [("1", "2"), ("alice", "bob"), ("zz", "a"), ("same", "same")];
        for (a, b) in pairs {
            let a = UserId::from(a);
            let b = UserId::from(b);
            assert_eq!(
                ConversationId::canonical(&a, &b),
                ConversationId::canonical(&b, &a)
            );
        }
    }

    #[test]
    fn canonical_id_sorts_ascending() {
        let id = ConversationId::canonical(&UserId::from("2"), &UserId::from("1"));
        assert_eq!(id.as_str(), "12");
    }

    #[test]
    fn user_id_rejects_empty_and_slash() {
        assert!(matches!(UserId::new(""), Err(TandemError::EmptyId)));
        assert!(matches!(UserId::new("a/b"), Err(TandemError::InvalidId(_))));
        assert_eq!(UserId::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn short_truncates_long_ids() {
        assert_eq!(UserId::from("0123456789abcdef").short(), "01234567");
        assert_eq!(UserId::from("abc").short(), "abc");
    }
}
