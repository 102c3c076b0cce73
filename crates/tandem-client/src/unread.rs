//! Unread badge counts, derived from the message log and the selection.

use std::collections::BTreeMap;

use serde::Serialize;
use tandem_shared::ConversationId;

use crate::message_log::MessageLog;

/// conversation id -> unread peer messages. Conversations with nothing
/// unread are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UnreadIndex(BTreeMap<ConversationId, usize>);

impl UnreadIndex {
    pub fn count(&self, conversation_id: &ConversationId) -> usize {
        self.0.get(conversation_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConversationId, &usize)> {
        self.0.iter()
    }
}

/// Holds the latest derived [`UnreadIndex`]; it is rebuilt from scratch on
/// every recompute.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    index: UnreadIndex,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recount every logged conversation except `active`, whose messages are
    /// treated as seen. Returns `true` when any badge changed.
    pub fn recompute(&mut self, log: &MessageLog, active: Option<&ConversationId>) -> bool {
        let counts = log
            .conversation_ids()
            .filter(|id| Some(*id) != active)
            .filter_map(|id| {
                let n = log.unread_from_peer(id);
                (n > 0).then(|| (id.clone(), n))
            })
            .collect();
        let next = UnreadIndex(counts);
        let changed = next != self.index;
        self.index = next;
        changed
    }

    pub fn unread_count(&self, conversation_id: &ConversationId) -> usize {
        self.index.count(conversation_id)
    }

    pub fn index(&self) -> &UnreadIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_shared::{Message, UserId};
    use uuid::Uuid;

    fn unread_from(sender: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender: UserId::from(sender),
            text: Some("hi".into()),
            img: None,
            read: false,
            date: Utc::now(),
        }
    }

    #[test]
    fn active_conversation_is_excluded() {
        let mut log = MessageLog::new(UserId::from("2"));
        let a = ConversationId::from("12");
        let b = ConversationId::from("23");
        log.append_or_replace(&a, vec![unread_from("1")]);
        log.append_or_replace(&b, vec![unread_from("3"), unread_from("3")]);

        let mut tracker = UnreadTracker::new();
        assert!(tracker.recompute(&log, Some(&b)));
        assert_eq!(tracker.unread_count(&a), 1);
        assert_eq!(tracker.unread_count(&b), 0);

        assert!(tracker.recompute(&log, Some(&a)));
        assert_eq!(tracker.unread_count(&a), 0);
        assert_eq!(tracker.unread_count(&b), 2);
        assert_eq!(tracker.index().total(), 2);

        assert!(!tracker.recompute(&log, Some(&a)));
    }

    #[test]
    fn own_messages_never_count() {
        let mut log = MessageLog::new(UserId::from("1"));
        let a = ConversationId::from("12");
        log.append_or_replace(&a, vec![unread_from("1")]);

        let mut tracker = UnreadTracker::new();
        tracker.recompute(&log, None);
        assert!(tracker.index().is_empty());
    }
}
