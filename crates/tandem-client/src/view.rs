//! The merged state handed to the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tandem_shared::{ConversationId, ConversationSummary, User, UserId};
use tracing::warn;

use crate::conversation_index::ConversationIndex;
use crate::directory::UserDirectory;
use crate::message_log::{LoggedMessage, MessageLog};
use crate::selection::SelectionController;
use crate::unread::{UnreadIndex, UnreadTracker};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncView {
    pub user: Option<UserId>,
    /// Signed in but the directory or the conversation list has not arrived.
    pub loading: bool,
    pub query: String,
    /// Non-deleted conversations matching `query`, most recent first.
    pub conversations: Vec<ConversationRow>,
    pub active: Option<ConversationId>,
    pub active_peer: Option<PeerView>,
    pub active_messages: Vec<LoggedMessage>,
    pub unread: UnreadIndex,
    pub failures: Vec<SyncFailure>,
}

impl SyncView {
    pub fn row(&self, id: &ConversationId) -> Option<&ConversationRow> {
        self.conversations.iter().find(|r| &r.id == id)
    }

    pub fn unread_count(&self, id: &ConversationId) -> usize {
        self.unread.count(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    pub id: ConversationId,
    pub peer: PeerView,
    pub preview: String,
    pub last_activity_at: DateTime<Utc>,
    pub unread: usize,
    pub failed_reads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    pub uid: UserId,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&User> for PeerView {
    fn from(u: &User) -> Self {
        Self {
            uid: u.uid.clone(),
            display_name: u.display_name.clone(),
            photo_url: u.photo_url.clone(),
            is_online: u.is_online,
            last_seen: u.last_seen,
        }
    }
}

impl From<&ConversationSummary> for PeerView {
    fn from(s: &ConversationSummary) -> Self {
        Self {
            uid: s.user_info.uid.clone(),
            display_name: s.user_info.display_name.clone(),
            photo_url: s.user_info.photo_url.clone(),
            is_online: false,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    ReadMark,
    Send,
    Delete,
}

/// A write that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub conversation_id: ConversationId,
    pub kind: FailureKind,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Borrowed session state a view is projected from.
pub(crate) struct ViewSource<'a> {
    pub user: &'a UserId,
    pub query: &'a str,
    pub directory: &'a UserDirectory,
    pub index: &'a ConversationIndex,
    pub log: &'a MessageLog,
    pub unread: &'a UnreadTracker,
    pub selection: &'a SelectionController,
    pub failures: &'a [SyncFailure],
}

impl ViewSource<'_> {
    pub fn project(&self) -> SyncView {
        let conversations = self
            .index
            .search(self.query, self.directory)
            .into_iter()
            .filter_map(|(id, summary)| {
                let peer = match self.directory.get(&summary.user_info.uid) {
                    Some(user) => PeerView::from(user),
                    None if self.directory.is_loaded() => {
                        warn!(conversation = %id, peer = %summary.user_info.uid, "peer missing from directory, hiding row");
                        return None;
                    }
                    None => PeerView::from(summary),
                };
                Some(ConversationRow {
                    id: id.clone(),
                    peer,
                    preview: summary.preview().to_string(),
                    last_activity_at: summary.date,
                    unread: self.unread.unread_count(id),
                    failed_reads: self.log.failed_reads(id),
                })
            })
            .collect();

        let active = self.selection.active().cloned();
        let active_peer = self.selection.active_peer().map(|peer| {
            if let Some(user) = self.directory.get(peer) {
                return PeerView::from(user);
            }
            match active.as_ref().and_then(|id| self.index.get(id)) {
                Some(summary) => PeerView::from(summary),
                None => PeerView {
                    uid: peer.clone(),
                    display_name: peer.to_string(),
                    photo_url: None,
                    is_online: false,
                    last_seen: None,
                },
            }
        });
        let active_messages = active
            .as_ref()
            .map(|id| self.log.messages(id))
            .unwrap_or_default();

        SyncView {
            user: Some(self.user.clone()),
            loading: !(self.directory.is_loaded() && self.index.is_loaded()),
            query: self.query.to_string(),
            conversations,
            active,
            active_peer,
            active_messages,
            unread: self.unread.index().clone(),
            failures: self.failures.to_vec(),
        }
    }
}
