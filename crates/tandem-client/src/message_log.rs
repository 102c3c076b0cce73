//! Per-conversation message history with read state.
//!
//! The last pushed `chats/{id}` snapshot is the source of truth. On top of it
//! sits an overlay of read marks applied locally but not yet confirmed by a
//! snapshot. A message is observed as read when either the snapshot or the
//! overlay says so, which keeps `read` monotonic while a write is in flight
//! or after it failed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;
use tandem_shared::{ConversationId, DocumentPath, Message, UserId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SyncError;

/// Where a message's read flag stands relative to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// Matches the store, or the write was acknowledged.
    Committed,
    /// Marked read locally; the write is in flight.
    Pending,
    /// Marked read locally; the write failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub sync: SyncState,
}

/// A batch of messages marked read locally, awaiting persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMark {
    pub id: u64,
    pub conversation_id: ConversationId,
    pub reader: UserId,
    pub message_ids: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Copy)]
struct OverlayEntry {
    mark: u64,
    state: SyncState,
}

#[derive(Debug, Default)]
struct ConversationLog {
    remote: Vec<Message>,
    overlay: BTreeMap<Uuid, OverlayEntry>,
}

impl ConversationLog {
    fn is_read(&self, message: &Message) -> bool {
        message.read || self.overlay.contains_key(&message.id)
    }
}

#[derive(Debug)]
pub struct MessageLog {
    self_id: UserId,
    logs: HashMap<ConversationId, ConversationLog>,
    next_mark: u64,
}

impl MessageLog {
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            logs: HashMap::new(),
            next_mark: 1,
        }
    }

    /// Replace a conversation's messages with a pushed snapshot.
    ///
    /// Overlay entries the snapshot confirms (message now read) or no longer
    /// contains are dropped; the rest stay so nothing reads as unread again.
    pub fn append_or_replace(&mut self, conversation_id: &ConversationId, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| a.date.cmp(&b.date));

        let log = self.logs.entry(conversation_id.clone()).or_default();
        let by_id: HashMap<Uuid, bool> = messages.iter().map(|m| (m.id, m.read)).collect();
        log.overlay
            .retain(|id, _| matches!(by_id.get(id), Some(&false)));
        log.remote = messages;

        debug!(
            conversation = %conversation_id,
            messages = log.remote.len(),
            overlay = log.overlay.len(),
            "message log replaced"
        );
    }

    /// Forget a conversation whose document is gone.
    pub fn remove(&mut self, conversation_id: &ConversationId) {
        self.logs.remove(conversation_id);
    }

    /// Drop logs for conversations no longer watched.
    pub fn retain(&mut self, watched: &BTreeSet<ConversationId>) {
        self.logs.retain(|id, _| watched.contains(id));
    }

    pub fn conversation_ids(&self) -> impl Iterator<Item = &ConversationId> {
        self.logs.keys()
    }

    /// Messages as observed locally, oldest first.
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<LoggedMessage> {
        let Some(log) = self.logs.get(conversation_id) else {
            return Vec::new();
        };
        log.remote
            .iter()
            .map(|m| {
                let entry = log.overlay.get(&m.id);
                let mut message = m.clone();
                message.read = log.is_read(m);
                LoggedMessage {
                    message,
                    sync: entry.map(|e| e.state).unwrap_or(SyncState::Committed),
                }
            })
            .collect()
    }

    /// Observed unread messages authored by the peer.
    pub fn unread_from_peer(&self, conversation_id: &ConversationId) -> usize {
        self.logs
            .get(conversation_id)
            .map(|log| {
                log.remote
                    .iter()
                    .filter(|m| m.is_unread_from_peer(&self.self_id) && !log.is_read(m))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Messages whose local read mark failed to persist.
    pub fn failed_reads(&self, conversation_id: &ConversationId) -> usize {
        self.logs
            .get(conversation_id)
            .map(|log| {
                log.overlay
                    .values()
                    .filter(|e| e.state == SyncState::Failed)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Optimistically mark every peer message not yet read in the store as
    /// read, and return the mark to persist. Messages already covered by an
    /// earlier mark are taken over by this one. The returned mark may be
    /// empty; persisting it is still safe.
    pub fn mark_all_read_from_peer(&mut self, conversation_id: &ConversationId) -> ReadMark {
        let id = self.next_mark;
        self.next_mark += 1;

        let mut message_ids = BTreeSet::new();
        if let Some(log) = self.logs.get_mut(conversation_id) {
            for m in log.remote.iter().filter(|m| m.is_unread_from_peer(&self.self_id)) {
                log.overlay.insert(
                    m.id,
                    OverlayEntry {
                        mark: id,
                        state: SyncState::Pending,
                    },
                );
                message_ids.insert(m.id);
            }
        }

        debug!(
            conversation = %conversation_id,
            mark = id,
            count = message_ids.len(),
            "read mark applied locally"
        );

        ReadMark {
            id,
            conversation_id: conversation_id.clone(),
            reader: self.self_id.clone(),
            message_ids,
        }
    }

    /// Record the outcome of persisting `mark`. Only entries still owned by
    /// this mark, in this mark's conversation, are touched. Returns how many
    /// were.
    pub fn settle(&mut self, mark: &ReadMark, persisted: bool) -> usize {
        let Some(log) = self.logs.get_mut(&mark.conversation_id) else {
            return 0;
        };
        let state = if persisted {
            SyncState::Committed
        } else {
            SyncState::Failed
        };
        let mut owned = 0;
        for id in &mark.message_ids {
            if let Some(entry) = log.overlay.get_mut(id) {
                if entry.mark == mark.id {
                    entry.state = state;
                    owned += 1;
                }
            }
        }
        if !persisted && owned > 0 {
            warn!(
                conversation = %mark.conversation_id,
                mark = mark.id,
                count = owned,
                "read mark failed to persist"
            );
        }
        owned
    }
}

/// Decode a `chats/{id}` body, skipping messages that do not decode.
pub fn decode_messages(path: &DocumentPath, data: &Value) -> Vec<Message> {
    let Some(raw) = data.get("messages").and_then(Value::as_array) else {
        if !data.is_null() {
            warn!(error = %SyncError::transient(path, "no messages array"), "treating chat as empty");
        }
        return Vec::new();
    };
    raw.iter()
        .enumerate()
        .filter_map(|(i, m)| match serde_json::from_value::<Message>(m.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %SyncError::transient(path, format!("message {i}: {e}")), "skipping message");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(sender: &str, read: bool, secs: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender: UserId::from(sender),
            text: Some(format!("m{secs}")),
            img: None,
            read,
            date: at(secs),
        }
    }

    fn conv() -> ConversationId {
        ConversationId::from("12")
    }

    #[test]
    fn replace_sorts_by_timestamp() {
        let mut log = MessageLog::new(UserId::from("1"));
        log.append_or_replace(&conv(), vec![msg("2", false, 5), msg("1", false, 1)]);
        let dates: Vec<_> = log.messages(&conv()).iter().map(|m| m.message.date).collect();
        assert_eq!(dates, vec![at(1), at(5)]);
    }

    #[test]
    fn unread_counts_only_peer_messages() {
        let mut log = MessageLog::new(UserId::from("1"));
        log.append_or_replace(
            &conv(),
            vec![msg("2", false, 1), msg("2", true, 2), msg("1", false, 3)],
        );
        assert_eq!(log.unread_from_peer(&conv()), 1);
        assert_eq!(log.unread_from_peer(&ConversationId::from("99")), 0);
    }

    #[test]
    fn mark_is_optimistic_and_survives_stale_snapshot() {
        let mut log = MessageLog::new(UserId::from("1"));
        let m = msg("2", false, 1);
        log.append_or_replace(&conv(), vec![m.clone()]);

        let mark = log.mark_all_read_from_peer(&conv());
        assert_eq!(mark.message_ids.len(), 1);
        assert_eq!(log.unread_from_peer(&conv()), 0);
        assert_eq!(log.messages(&conv())[0].sync, SyncState::Pending);

        // A snapshot written before the mark landed still shows it unread.
        log.append_or_replace(&conv(), vec![m.clone(), msg("2", false, 2)]);
        let observed = log.messages(&conv());
        assert!(observed[0].message.read);
        assert!(!observed[1].message.read);
        assert_eq!(log.unread_from_peer(&conv()), 1);

        // Confirmation clears the overlay.
        let mut confirmed = m;
        confirmed.read = true;
        log.settle(&mark, true);
        log.append_or_replace(&conv(), vec![confirmed]);
        assert_eq!(log.messages(&conv())[0].sync, SyncState::Committed);
        assert!(log.messages(&conv())[0].message.read);
    }

    #[test]
    fn failed_mark_stays_read_and_is_reported() {
        let mut log = MessageLog::new(UserId::from("1"));
        log.append_or_replace(&conv(), vec![msg("2", false, 1), msg("2", false, 2)]);

        let mark = log.mark_all_read_from_peer(&conv());
        assert_eq!(log.settle(&mark, false), 2);

        assert_eq!(log.unread_from_peer(&conv()), 0);
        assert_eq!(log.failed_reads(&conv()), 2);
        assert!(log
            .messages(&conv())
            .iter()
            .all(|m| m.message.read && m.sync == SyncState::Failed));

        // A retry takes the entries over and can commit them.
        let retry = log.mark_all_read_from_peer(&conv());
        assert_eq!(retry.message_ids, mark.message_ids);
        assert_eq!(log.settle(&mark, false), 0);
        assert_eq!(log.failed_reads(&conv()), 0);
        log.settle(&retry, true);
        assert!(log
            .messages(&conv())
            .iter()
            .all(|m| m.sync == SyncState::Committed));
    }

    #[test]
    fn settle_only_touches_its_own_conversation() {
        let mut log = MessageLog::new(UserId::from("1"));
        let other = ConversationId::from("13");
        log.append_or_replace(&conv(), vec![msg("2", false, 1)]);
        log.append_or_replace(&other, vec![msg("3", false, 1)]);

        let a = log.mark_all_read_from_peer(&conv());
        let b = log.mark_all_read_from_peer(&other);
        log.settle(&a, false);

        assert_eq!(log.failed_reads(&conv()), 1);
        assert_eq!(log.failed_reads(&other), 0);
        assert_eq!(log.messages(&other)[0].sync, SyncState::Pending);
        log.settle(&b, true);
    }

    #[test]
    fn read_never_reverts_across_operations() {
        let mut log = MessageLog::new(UserId::from("1"));
        let m = msg("2", false, 1);
        log.append_or_replace(&conv(), vec![m.clone()]);

        let mark = log.mark_all_read_from_peer(&conv());
        let mut seen_read = false;
        for step in 0..4 {
            match step {
                0 => log.append_or_replace(&conv(), vec![m.clone()]),
                1 => {
                    log.settle(&mark, false);
                }
                2 => log.append_or_replace(&conv(), vec![m.clone()]),
                _ => {
                    log.mark_all_read_from_peer(&conv());
                }
            }
            let read = log.messages(&conv())[0].message.read;
            assert!(!seen_read || read, "read reverted at step {step}");
            seen_read |= read;
        }
    }

    #[test]
    fn mark_on_empty_log_is_harmless() {
        let mut log = MessageLog::new(UserId::from("1"));
        let first = log.mark_all_read_from_peer(&conv());
        let second = log.mark_all_read_from_peer(&conv());
        assert!(first.message_ids.is_empty());
        assert_ne!(first.id, second.id);
        log.settle(&first, false);
        assert_eq!(log.failed_reads(&conv()), 0);
    }

    #[test]
    fn decode_skips_bad_messages() {
        let path = DocumentPath::chat(&conv());
        let good = serde_json::to_value(msg("2", false, 1)).unwrap();
        let body = json!({ "messages": [good, {"sender": "2"}] });
        assert_eq!(decode_messages(&path, &body).len(), 1);
        assert!(decode_messages(&path, &json!({})).is_empty());
    }
}
