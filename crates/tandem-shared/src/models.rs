//! Document models as they are laid out in the remote store.
//!
//! Field names follow the store's camelCase convention so that documents
//! written by other clients decode unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{EMPTY_PREVIEW, IMAGE_PREVIEW, MAX_MESSAGE_TEXT};
use crate::error::TandemError;
use crate::types::UserId;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Profile and presence record stored at `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Updated by presence heartbeats.
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(uid: UserId, display_name: impl Into<String>) -> Self {
        Self {
            uid,
            display_name: display_name.into(),
            email: None,
            photo_url: None,
            is_online: false,
            last_seen: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation summary
// ---------------------------------------------------------------------------

/// The peer as recorded inside a conversation summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub uid: UserId,
    pub display_name: String,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl From<&User> for PeerInfo {
    fn from(u: &User) -> Self {
        Self {
            uid: u.uid.clone(),
            display_name: u.display_name.clone(),
            photo_url: u.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
}

impl LastMessage {
    pub fn preview(&self) -> &str {
        match (&self.text, &self.img) {
            (Some(text), _) if !text.is_empty() => text,
            (_, Some(_)) => IMAGE_PREVIEW,
            _ => EMPTY_PREVIEW,
        }
    }
}

/// One entry of the `userChats/{uid}` document, keyed by conversation id.
///
/// The document belongs to the viewing user, so `deleted` hides the
/// conversation for that viewer only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub user_info: PeerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    /// Last activity time.
    pub date: DateTime<Utc>,
    #[serde(rename = "chatDeleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl ConversationSummary {
    pub fn preview(&self) -> &str {
        self.last_message
            .as_ref()
            .map(LastMessage::preview)
            .unwrap_or(EMPTY_PREVIEW)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// What a user sends: text, an image, or an image with a caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Image { url: String, caption: Option<String> },
}

/// A single chat message inside `chats/{conversationId}`.
///
/// Immutable once written except for `read`, which only ever goes from
/// `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub date: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: UserId, body: MessageBody, date: DateTime<Utc>) -> Result<Self, TandemError> {
        let (text, img) = match body {
            MessageBody::Text(text) => (Some(text), None),
            MessageBody::Image { url, caption } => (caption, Some(url)),
        };

        let text = text.filter(|t| !t.trim().is_empty());
        let img = img.filter(|u| !u.is_empty());
        if text.is_none() && img.is_none() {
            return Err(TandemError::EmptyMessage);
        }
        if let Some(ref t) = text {
            if t.len() > MAX_MESSAGE_TEXT {
                return Err(TandemError::MessageTooLarge {
                    size: t.len(),
                    max: MAX_MESSAGE_TEXT,
                });
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            sender,
            text,
            img,
            read: false,
            date,
        })
    }

    pub fn is_unread_from_peer(&self, self_id: &UserId) -> bool {
        !self.read && &self.sender != self_id
    }

    pub fn last_message(&self) -> LastMessage {
        LastMessage {
            text: self.text.clone(),
            img: self.img.clone(),
        }
    }
}

/// Body of `chats/{conversationId}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatDocument {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_prefers_text_then_image() {
        let text = LastMessage {
            text: Some("hello".into()),
            img: Some("https://img".into()),
        };
        assert_eq!(text.preview(), "hello");

        let image = LastMessage {
            text: Some(String::new()),
            img: Some("https://img".into()),
        };
        assert_eq!(image.preview(), IMAGE_PREVIEW);

        assert_eq!(LastMessage::default().preview(), EMPTY_PREVIEW);
    }

    #[test]
    fn summary_decodes_store_layout() {
        let raw = json!({
            "userInfo": { "uid": "2", "displayName": "Bob", "photoURL": "https://p" },
            "lastMessage": { "text": "hey" },
            "date": "2024-05-01T10:00:00Z",
            "chatDeleted": true
        });
        let summary: ConversationSummary = serde_json::from_value(raw).unwrap();
        assert_eq!(summary.user_info.uid, UserId::from("2"));
        assert!(summary.deleted);
        assert_eq!(summary.preview(), "hey");
    }

    #[test]
    fn summary_without_deleted_flag_is_visible() {
        let raw = json!({
            "userInfo": { "uid": "2", "displayName": "Bob" },
            "date": "2024-05-01T10:00:00Z"
        });
        let summary: ConversationSummary = serde_json::from_value(raw).unwrap();
        assert!(!summary.deleted);
        assert_eq!(summary.preview(), EMPTY_PREVIEW);
        // The flag is omitted again on the way out.
        let back = serde_json::to_value(&summary).unwrap();
        assert!(back.get("chatDeleted").is_none());
    }

    #[test]
    fn message_requires_content() {
        let sender = UserId::from("1");
        assert!(matches!(
            Message::new(sender.clone(), MessageBody::Text("   ".into()), Utc::now()),
            Err(TandemError::EmptyMessage)
        ));
        let img = Message::new(
            sender,
            MessageBody::Image {
                url: "https://img".into(),
                caption: None,
            },
            Utc::now(),
        )
        .unwrap();
        assert!(img.text.is_none());
        assert_eq!(img.last_message().preview(), IMAGE_PREVIEW);
        assert!(!img.read);
    }

    #[test]
    fn message_rejects_oversized_text() {
        let big = "x".repeat(MAX_MESSAGE_TEXT + 1);
        assert!(matches!(
            Message::new(UserId::from("1"), MessageBody::Text(big), Utc::now()),
            Err(TandemError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn unread_from_peer_ignores_own_messages() {
        let me = UserId::from("1");
        let mine = Message::new(me.clone(), MessageBody::Text("hi".into()), Utc::now()).unwrap();
        let theirs =
            Message::new(UserId::from("2"), MessageBody::Text("yo".into()), Utc::now()).unwrap();
        assert!(!mine.is_unread_from_peer(&me));
        assert!(theirs.is_unread_from_peer(&me));
    }
}
