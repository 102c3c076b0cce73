//! Active-conversation state machine.
//!
//! ```text
//! NoneSelected --select_user / auto-select--> Selected(id)
//! Selected(a)  --select_user-->               Selected(b)
//! ```
//!
//! Auto-selection runs at most once per session, the first time both the
//! user directory and the conversation list have loaded.

use tandem_shared::{ConversationId, UserId};
use tracing::info;

use crate::conversation_index::ConversationIndex;
use crate::directory::UserDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    NoneSelected,
    Selected(ConversationId),
}

/// What the caller has to do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionOutcome {
    pub conversation_id: ConversationId,
    pub peer: UserId,
    /// Whether the conversation's peer messages should be marked read.
    pub mark_read: bool,
    pub auto: bool,
}

#[derive(Debug)]
pub struct SelectionController {
    self_id: UserId,
    selection: Selection,
    active_peer: Option<UserId>,
    /// Latched once auto-selection has been evaluated for this session.
    auto_selected: bool,
}

impl SelectionController {
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            selection: Selection::NoneSelected,
            active_peer: None,
            auto_selected: false,
        }
    }

    pub fn active(&self) -> Option<&ConversationId> {
        match &self.selection {
            Selection::Selected(id) => Some(id),
            Selection::NoneSelected => None,
        }
    }

    pub fn active_peer(&self) -> Option<&UserId> {
        self.active_peer.as_ref()
    }

    /// Open the conversation with `peer`. `unread_before` is the peer's
    /// unread count for that conversation prior to the switch.
    pub fn select_user(&mut self, peer: &UserId, unread_before: usize) -> SelectionOutcome {
        let conversation_id = ConversationId::canonical(&self.self_id, peer);
        self.selection = Selection::Selected(conversation_id.clone());
        self.active_peer = Some(peer.clone());

        info!(conversation = %conversation_id, unread = unread_before, "conversation selected");

        SelectionOutcome {
            conversation_id,
            peer: peer.clone(),
            mark_read: unread_before > 0,
            auto: false,
        }
    }

    /// Evaluate the one-time auto-selection. Returns `None` until both inputs
    /// have loaded, and always `None` once it has run. The newest visible
    /// conversation whose peer is in the directory wins. If the user already
    /// picked a conversation, or there is none, the latch is set without
    /// selecting anything.
    pub fn maybe_auto_select(
        &mut self,
        directory: &UserDirectory,
        index: &ConversationIndex,
    ) -> Option<SelectionOutcome> {
        if self.auto_selected || !directory.is_loaded() || !index.is_loaded() {
            return None;
        }
        self.auto_selected = true;

        if self.selection != Selection::NoneSelected {
            return None;
        }

        let (id, summary) = index
            .visible()
            .into_iter()
            .find(|(_, summary)| directory.get(&summary.user_info.uid).is_some())?;
        let peer = summary.user_info.uid.clone();
        let conversation_id = id.clone();

        self.selection = Selection::Selected(conversation_id.clone());
        self.active_peer = Some(peer.clone());

        info!(conversation = %conversation_id, "auto-selected most recent conversation");

        Some(SelectionOutcome {
            conversation_id,
            peer,
            mark_read: true,
            auto: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tandem_shared::{ConversationSummary, DocumentPath, PeerInfo};
    use tandem_store::DocumentSnapshot;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn index(entries: &[(&str, i64, bool)]) -> ConversationIndex {
        let me = UserId::from("1");
        let mut index = ConversationIndex::new(me.clone());
        let snapshot: BTreeMap<_, _> = entries
            .iter()
            .map(|(peer, secs, deleted)| {
                let peer = UserId::from(*peer);
                (
                    ConversationId::canonical(&me, &peer),
                    ConversationSummary {
                        user_info: PeerInfo {
                            uid: peer,
                            display_name: "x".into(),
                            photo_url: None,
                        },
                        last_message: None,
                        date: at(*secs),
                        deleted: *deleted,
                    },
                )
            })
            .collect();
        index.on_update(snapshot);
        index
    }

    fn directory(uids: &[&str]) -> UserDirectory {
        let docs: Vec<_> = uids
            .iter()
            .map(|uid| DocumentSnapshot {
                path: DocumentPath::user(&UserId::from(*uid)),
                data: Some(json!({"uid": uid, "displayName": format!("user {uid}")})),
            })
            .collect();
        let mut dir = UserDirectory::new();
        dir.on_update(&docs);
        dir
    }

    fn everyone() -> UserDirectory {
        directory(&["1", "2", "3", "4"])
    }

    #[test]
    fn select_user_uses_canonical_id_and_marks_only_when_unread() {
        let mut sel = SelectionController::new(UserId::from("2"));
        let out = sel.select_user(&UserId::from("1"), 0);
        assert_eq!(out.conversation_id.as_str(), "12");
        assert!(!out.mark_read);
        assert_eq!(sel.active(), Some(&ConversationId::from("12")));

        let out = sel.select_user(&UserId::from("3"), 4);
        assert!(out.mark_read);
        assert_eq!(sel.active_peer(), Some(&UserId::from("3")));
    }

    #[test]
    fn auto_select_picks_latest_non_deleted() {
        let mut sel = SelectionController::new(UserId::from("1"));
        let idx = index(&[("2", 10, false), ("3", 20, false), ("4", 30, true)]);

        let out = sel.maybe_auto_select(&everyone(), &idx).unwrap();
        assert_eq!(out.conversation_id.as_str(), "13");
        assert!(out.mark_read && out.auto);
    }

    #[test]
    fn auto_select_skips_peers_missing_from_directory() {
        let mut sel = SelectionController::new(UserId::from("1"));
        let idx = index(&[("2", 10, false), ("3", 20, false)]);

        let out = sel.maybe_auto_select(&directory(&["1", "2"]), &idx).unwrap();
        assert_eq!(out.conversation_id.as_str(), "12");
        assert_eq!(out.peer, UserId::from("2"));
        assert_eq!(sel.active(), Some(&ConversationId::from("12")));

        let mut nobody = SelectionController::new(UserId::from("1"));
        assert!(nobody.maybe_auto_select(&directory(&["1"]), &idx).is_none());
        assert_eq!(nobody.active(), None);
        assert!(nobody.maybe_auto_select(&everyone(), &idx).is_none());
    }

    #[test]
    fn auto_select_waits_for_both_inputs_then_fires_once() {
        let mut sel = SelectionController::new(UserId::from("1"));
        let unloaded = ConversationIndex::new(UserId::from("1"));
        assert!(sel.maybe_auto_select(&everyone(), &unloaded).is_none());

        let idx = index(&[("2", 10, false)]);
        assert!(sel.maybe_auto_select(&UserDirectory::new(), &idx).is_none());

        assert!(sel.maybe_auto_select(&everyone(), &idx).is_some());
        for _ in 0..3 {
            let newer = index(&[("2", 10, false), ("3", 99, false)]);
            assert!(sel.maybe_auto_select(&everyone(), &newer).is_none());
        }
        assert_eq!(sel.active(), Some(&ConversationId::from("12")));
    }

    #[test]
    fn auto_select_latches_on_empty_list_and_manual_choice() {
        let mut sel = SelectionController::new(UserId::from("1"));
        assert!(sel.maybe_auto_select(&everyone(), &index(&[])).is_none());
        assert!(sel
            .maybe_auto_select(&everyone(), &index(&[("2", 1, false)]))
            .is_none());
        assert_eq!(sel.active(), None);

        let mut manual = SelectionController::new(UserId::from("1"));
        manual.select_user(&UserId::from("3"), 0);
        assert!(manual
            .maybe_auto_select(&everyone(), &index(&[("2", 1, false)]))
            .is_none());
        assert_eq!(manual.active(), Some(&ConversationId::from("13")));
    }
}
