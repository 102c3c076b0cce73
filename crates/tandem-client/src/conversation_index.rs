//! Projection of the viewer's `userChats/{uid}` document.
//!
//! Every snapshot replaces the whole index; nothing here is mutated locally.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tandem_shared::{ConversationId, ConversationSummary, DocumentPath, UserId};
use tracing::warn;

use crate::directory::UserDirectory;
use crate::error::{Result, SyncError};

#[derive(Debug)]
pub struct ConversationIndex {
    self_id: UserId,
    entries: BTreeMap<ConversationId, ConversationSummary>,
    loaded: bool,
}

impl ConversationIndex {
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            entries: BTreeMap::new(),
            loaded: false,
        }
    }

    /// Replace the index with an already-decoded snapshot.
    pub fn on_update(&mut self, snapshot: BTreeMap<ConversationId, ConversationSummary>) {
        self.entries = snapshot;
        self.loaded = true;
    }

    /// Decode a raw `userChats` body and replace the index with it. A missing
    /// document is an empty index. Entries that fail to decode or whose key
    /// is not the canonical id for (self, peer) are skipped; the number of
    /// skipped entries is returned.
    pub fn apply_document(&mut self, data: Option<&Value>) -> usize {
        let path = DocumentPath::user_chats(&self.self_id);
        let mut snapshot = BTreeMap::new();
        let mut skipped = 0;

        match data {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, raw) in map {
                    match self.decode_entry(&path, key, raw) {
                        Ok(summary) => {
                            snapshot.insert(ConversationId(key.clone()), summary);
                        }
                        Err(e) => {
                            warn!(error = %e, "skipping conversation entry");
                            skipped += 1;
                        }
                    }
                }
            }
            Some(_) => {
                warn!(%path, "conversation index is not an object, treating as empty");
            }
        }

        self.on_update(snapshot);
        skipped
    }

    fn decode_entry(&self, path: &DocumentPath, key: &str, raw: &Value) -> Result<ConversationSummary> {
        let summary: ConversationSummary = serde_json::from_value(raw.clone())
            .map_err(|e| SyncError::transient(path, format!("{key}: {e}")))?;

        let peer = &summary.user_info.uid;
        if *peer == self.self_id {
            return Err(SyncError::transient(path, format!("{key}: peer is self")));
        }
        let canonical = ConversationId::canonical(&self.self_id, peer);
        if canonical.as_str() != key {
            return Err(SyncError::transient(
                path,
                format!("{key}: expected canonical id {canonical}"),
            ));
        }
        Ok(summary)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn get(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.entries.get(id)
    }

    /// Every conversation id in the index, deleted ones included.
    pub fn known_ids(&self) -> BTreeSet<ConversationId> {
        self.entries.keys().cloned().collect()
    }

    /// Non-deleted conversations, most recent activity first. Equal
    /// timestamps fall back to id order.
    pub fn visible(&self) -> Vec<(&ConversationId, &ConversationSummary)> {
        let mut rows: Vec<_> = self.entries.iter().filter(|(_, s)| !s.deleted).collect();
        rows.sort_by(|a, b| match b.1.date.cmp(&a.1.date) {
            Ordering::Equal => a.0.cmp(b.0),
            other => other,
        });
        rows
    }

    /// [`visible`](Self::visible) filtered by a case-insensitive match on the
    /// peer's display name or the last message text. The display name comes
    /// from the directory when the peer is known there.
    pub fn search(
        &self,
        query: &str,
        directory: &UserDirectory,
    ) -> Vec<(&ConversationId, &ConversationSummary)> {
        let needle = query.trim().to_lowercase();
        self.visible()
            .into_iter()
            .filter(|(_, summary)| {
                if needle.is_empty() {
                    return true;
                }
                let name = directory
                    .get(&summary.user_info.uid)
                    .map(|u| u.display_name.as_str())
                    .unwrap_or(summary.user_info.display_name.as_str());
                let text = summary
                    .last_message
                    .as_ref()
                    .and_then(|m| m.text.as_deref())
                    .unwrap_or_default();
                name.to_lowercase().contains(&needle) || text.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;
    use tandem_shared::{LastMessage, PeerInfo};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn summary(peer: &str, name: &str, text: &str, date: DateTime<Utc>, deleted: bool) -> ConversationSummary {
        ConversationSummary {
            user_info: PeerInfo {
                uid: UserId::from(peer),
                display_name: name.to_string(),
                photo_url: None,
            },
            last_message: Some(LastMessage {
                text: Some(text.to_string()),
                img: None,
            }),
            date,
            deleted,
        }
    }

    fn index_with(entries: Vec<(&str, ConversationSummary)>) -> ConversationIndex {
        let mut index = ConversationIndex::new(UserId::from("1"));
        index.on_update(
            entries
                .into_iter()
                .map(|(k, s)| (ConversationId::from(k), s))
                .collect(),
        );
        index
    }

    #[test]
    fn visible_excludes_deleted_and_sorts_descending() {
        let index = index_with(vec![
            ("12", summary("2", "Bob", "a", at(10), false)),
            ("13", summary("3", "Cat", "b", at(30), true)),
            ("14", summary("4", "Dan", "c", at(20), false)),
        ]);

        let ids: Vec<_> = index.visible().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["14", "12"]);
        assert_eq!(index.known_ids().len(), 3);
    }

    #[test]
    fn visible_is_ordered_for_arbitrary_dates() {
        let offsets = [5i64, -3, 17, 0, 42, 8, -20];
        let entries: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(i, off)| {
                let peer = format!("{}", i + 2);
                let key = ConversationId::canonical(&UserId::from("1"), &UserId::from(peer.as_str()));
                (key, summary(&peer, "P", "t", at(0) + Duration::seconds(*off), i % 3 == 0))
            })
            .collect();
        let mut index = ConversationIndex::new(UserId::from("1"));
        index.on_update(entries.into_iter().collect());

        let rows = index.visible();
        assert!(rows.iter().all(|(_, s)| !s.deleted));
        for pair in rows.windows(2) {
            assert!(pair[0].1.date >= pair[1].1.date);
        }
    }

    #[test]
    fn search_matches_name_or_message_case_insensitively() {
        let index = index_with(vec![
            ("12", summary("2", "Alice Smith", "see you", at(10), false)),
            ("13", summary("3", "Bob", "alice is late", at(20), false)),
            ("14", summary("4", "Carol", "nothing", at(30), false)),
        ]);
        let dir = UserDirectory::new();

        let hits: Vec<_> = index
            .search("alice", &dir)
            .iter()
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(hits, vec!["13", "12"]);

        assert_eq!(index.search("ALICE", &dir).len(), 2);
        assert_eq!(index.search("", &dir).len(), 3);
        assert!(index.search("zzz", &dir).is_empty());
    }

    #[test]
    fn apply_document_skips_malformed_and_non_canonical_entries() {
        let mut index = ConversationIndex::new(UserId::from("1"));
        let body = json!({
            "12": { "userInfo": {"uid": "2", "displayName": "Bob"}, "date": "2024-01-01T00:00:00Z" },
            "21": { "userInfo": {"uid": "2", "displayName": "Bob"}, "date": "2024-01-01T00:00:00Z" },
            "13": { "userInfo": {"uid": "3"} },
            "11": { "userInfo": {"uid": "1", "displayName": "Me"}, "date": "2024-01-01T00:00:00Z" }
        });

        let skipped = index.apply_document(Some(&body));
        assert_eq!(skipped, 3);
        assert!(index.is_loaded());
        assert_eq!(index.known_ids().len(), 1);
        assert!(index.get(&ConversationId::from("12")).is_some());
    }

    #[test]
    fn missing_document_is_an_empty_loaded_index() {
        let mut index = index_with(vec![("12", summary("2", "Bob", "a", at(10), false))]);
        index.apply_document(None);
        assert!(index.is_loaded());
        assert!(index.visible().is_empty());
    }
}
