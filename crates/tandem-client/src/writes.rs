//! Remote writes issued by the sync loop.
//!
//! Every write is a single atomic read-modify-write on one document, working
//! on the raw JSON so fields written by other clients survive untouched.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tandem_shared::{ConversationId, DocumentPath, Message, PeerInfo, UserId};
use tandem_store::{RemoteStore, StoreError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

/// Run `op`, retrying failures up to `policy.retries` times with linear
/// backoff. The last error is returned.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(what, attempt, error = %e, "write failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Flip `read` to `true` on every message in `chats/{id}` not sent by
/// `reader`, and write the whole array back in one mutation. Idempotent; a
/// missing document is left alone.
pub async fn persist_read_mark(
    store: &dyn RemoteStore,
    conversation_id: &ConversationId,
    reader: &UserId,
) -> Result<(), StoreError> {
    let path = DocumentPath::chat(conversation_id);
    let reader = reader.as_str().to_string();

    store
        .update(
            &path,
            Box::new(move |current| {
                let Some(mut doc) = current else {
                    return Ok(None);
                };
                let mut flipped = 0usize;
                if let Some(messages) = doc.get_mut("messages").and_then(Value::as_array_mut) {
                    for m in messages.iter_mut() {
                        let from_peer = m.get("sender").and_then(Value::as_str) != Some(reader.as_str());
                        let unread = m.get("read").and_then(Value::as_bool) != Some(true);
                        if from_peer && unread {
                            if let Some(obj) = m.as_object_mut() {
                                obj.insert("read".into(), Value::Bool(true));
                                flipped += 1;
                            }
                        }
                    }
                }
                debug!(flipped, "read mark mutation");
                Ok(Some(doc))
            }),
        )
        .await?;
    Ok(())
}

/// Append `message` to `chats/{id}`, creating the document if needed.
/// Appending a message id that is already present changes nothing.
pub async fn append_message(
    store: &dyn RemoteStore,
    conversation_id: &ConversationId,
    message: &Message,
) -> Result<(), StoreError> {
    let path = DocumentPath::chat(conversation_id);
    let encoded = serde_json::to_value(message)?;

    store
        .update(
            &path,
            Box::new(move |current| {
                let mut doc = match current {
                    Some(Value::Object(map)) => map,
                    Some(_) => return Err(StoreError::Rejected("chat document is not an object".into())),
                    None => Map::new(),
                };
                let messages = doc
                    .entry("messages")
                    .or_insert_with(|| Value::Array(Vec::new()));
                let Some(list) = messages.as_array_mut() else {
                    return Err(StoreError::Rejected("messages is not an array".into()));
                };
                // A retried append whose first attempt landed is a no-op.
                if list.iter().any(|m| m.get("id") == encoded.get("id")) {
                    return Ok(None);
                }
                list.push(encoded);
                Ok(Some(Value::Object(doc)))
            }),
        )
        .await?;
    Ok(())
}

/// Upsert the `conversation_id` entry in `userChats/{owner}` so it shows
/// `peer`, the last message and its time, and is no longer deleted.
pub async fn touch_summary(
    store: &dyn RemoteStore,
    owner: &UserId,
    conversation_id: &ConversationId,
    peer: &PeerInfo,
    message: &Message,
) -> Result<(), StoreError> {
    let path = DocumentPath::user_chats(owner);
    let key = conversation_id.as_str().to_string();
    let user_info = serde_json::to_value(peer)?;
    let last_message = serde_json::to_value(message.last_message())?;
    let date = serde_json::to_value(message.date)?;

    store
        .update(
            &path,
            Box::new(move |current| {
                let mut doc = match current {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                let entry = doc.entry(key).or_insert_with(|| json!({}));
                if !entry.is_object() {
                    *entry = json!({});
                }
                if let Some(obj) = entry.as_object_mut() {
                    obj.insert("userInfo".into(), user_info);
                    obj.insert("lastMessage".into(), last_message);
                    obj.insert("date".into(), date);
                    obj.remove("chatDeleted");
                }
                Ok(Some(Value::Object(doc)))
            }),
        )
        .await?;
    Ok(())
}

/// Deliver `message` from `sender` to `recipient`: append it to the chat,
/// then refresh both participants' summaries. Each step is retried on its
/// own; the first step that exhausts its retries aborts the rest.
pub async fn deliver_message(
    store: &dyn RemoteStore,
    policy: RetryPolicy,
    conversation_id: &ConversationId,
    message: &Message,
    sender: &PeerInfo,
    recipient: &PeerInfo,
) -> Result<(), StoreError> {
    with_retries(policy, "append message", || append_message(store, conversation_id, message)).await?;
    with_retries(policy, "sender summary", || {
        touch_summary(store, &sender.uid, conversation_id, recipient, message)
    })
    .await?;
    with_retries(policy, "recipient summary", || {
        touch_summary(store, &recipient.uid, conversation_id, sender, message)
    })
    .await
}

/// Hide `conversation_id` for `owner` only.
pub async fn soft_delete(
    store: &dyn RemoteStore,
    owner: &UserId,
    conversation_id: &ConversationId,
) -> Result<(), StoreError> {
    let path = DocumentPath::user_chats(owner);
    let key = conversation_id.as_str().to_string();

    store
        .update(
            &path,
            Box::new(move |current| {
                let Some(Value::Object(mut doc)) = current else {
                    return Err(StoreError::NotFound(format!("conversation {key}")));
                };
                match doc.get_mut(&key).and_then(Value::as_object_mut) {
                    Some(entry) => {
                        entry.insert("chatDeleted".into(), Value::Bool(true));
                    }
                    None => return Err(StoreError::NotFound(format!("conversation {key}"))),
                }
                Ok(Some(Value::Object(doc)))
            }),
        )
        .await?;
    Ok(())
}

/// Presence heartbeat on `users/{id}`. A missing profile is not created.
pub async fn set_presence(store: &dyn RemoteStore, user: &UserId, online: bool) -> Result<(), StoreError> {
    let path = DocumentPath::user(user);
    let last_seen = serde_json::to_value(Utc::now())?;

    store
        .update(
            &path,
            Box::new(move |current| {
                let Some(Value::Object(mut doc)) = current else {
                    return Ok(None);
                };
                doc.insert("isOnline".into(), Value::Bool(online));
                doc.insert("lastSeen".into(), last_seen);
                Ok(Some(Value::Object(doc)))
            }),
        )
        .await?;
    Ok(())
}
