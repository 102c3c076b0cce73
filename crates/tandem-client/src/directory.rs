//! Projection of the `users` collection.

use std::collections::HashMap;

use tandem_shared::{User, UserId};
use tandem_store::DocumentSnapshot;
use tracing::warn;

use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<UserId, User>,
    loaded: bool,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the directory with a full collection snapshot. Undecodable
    /// documents are skipped. Returns how many were skipped.
    pub fn on_update(&mut self, documents: &[DocumentSnapshot]) -> usize {
        let mut users = HashMap::with_capacity(documents.len());
        let mut skipped = 0;

        for doc in documents {
            match decode_user(doc) {
                Ok(Some(user)) => {
                    users.insert(user.uid.clone(), user);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "skipping user document");
                    skipped += 1;
                }
            }
        }

        self.users = users;
        self.loaded = true;
        skipped
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn decode_user(doc: &DocumentSnapshot) -> Result<Option<User>> {
    let Some(ref data) = doc.data else {
        return Ok(None);
    };
    let user: User = serde_json::from_value(data.clone())
        .map_err(|e| SyncError::transient(&doc.path, e))?;
    if user.uid.as_str() != doc.path.key {
        return Err(SyncError::transient(
            &doc.path,
            format!("uid {} does not match document key", user.uid),
        ));
    }
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_shared::DocumentPath;

    fn doc(key: &str, data: Option<serde_json::Value>) -> DocumentSnapshot {
        DocumentSnapshot {
            path: DocumentPath::user(&UserId::from(key)),
            data,
        }
    }

    #[test]
    fn replaces_contents_and_skips_bad_documents() {
        let mut dir = UserDirectory::new();
        assert!(!dir.is_loaded());

        let skipped = dir.on_update(&[
            doc("1", Some(json!({"uid": "1", "displayName": "Alice", "isOnline": true}))),
            doc("2", Some(json!({"uid": "9", "displayName": "Mismatch"}))),
            doc("3", Some(json!({"displayName": "No uid"}))),
            doc("4", None),
        ]);
        assert_eq!(skipped, 2);
        assert!(dir.is_loaded());
        assert_eq!(dir.len(), 1);
        assert!(dir.get(&UserId::from("1")).unwrap().is_online);

        dir.on_update(&[]);
        assert!(dir.is_empty());
        assert!(dir.is_loaded());
    }
}
