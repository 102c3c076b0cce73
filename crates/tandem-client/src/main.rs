//! Two clients talking through one local store.
//!
//! Set `TANDEM_DB_PATH` to keep the documents in SQLite between runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::to_value;
use tandem_client::{init_tracing, AuthProvider, ClientConfig, SyncHandle, SyncOrchestrator, SyncView};
use tandem_shared::constants::APP_NAME;
use tandem_shared::{ConversationId, DocumentPath, MessageBody, User, UserId};
use tandem_store::{Database, MemoryStore, RemoteStore};
use tokio::time::timeout;
use tracing::info;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ClientConfig::from_env();
    info!(app = APP_NAME, db = ?config.db_path, "starting demo");

    let store = match config.db_path {
        Some(ref path) => {
            let db = Database::open_at(path).with_context(|| format!("opening {}", path.display()))?;
            MemoryStore::with_database(db)?
        }
        None => MemoryStore::new(),
    };

    let alice = UserId::new("1")?;
    let bob = UserId::new("2")?;
    for user in [User::new(alice.clone(), "Alice"), User::new(bob.clone(), "Bob")] {
        let path = DocumentPath::user(&user.uid);
        if store.get(&path).await?.is_none() {
            store.set(&path, to_value(&user)?).await?;
        }
    }

    let store: Arc<dyn RemoteStore> = Arc::new(store);
    let (alice_client, alice_auth) = start(store.clone(), &config, alice.clone());
    let (bob_client, bob_auth) = start(store.clone(), &config, bob.clone());

    let conversation = ConversationId::canonical(&alice, &bob);

    alice_client
        .send_message(&bob, MessageBody::Text("hi".into()))
        .await?;
    info!(conversation = %conversation, "alice sent a message");

    let view = wait_for(&bob_client, |v| v.row(&conversation).is_some()).await?;
    let unread = view.unread_count(&conversation);
    info!(unread, active = ?view.active, "bob sees the conversation");

    bob_client.select_user(&alice).await?;
    let view = wait_for(&bob_client, |v| v.active.as_ref() == Some(&conversation)).await?;
    for row in &view.conversations {
        info!(
            conversation = %row.id,
            peer = %row.peer.display_name,
            preview = %row.preview,
            unread = row.unread,
            "row"
        );
    }
    bob_client.mark_all_read(&conversation).await?;

    bob_client
        .send_message(&alice, MessageBody::Text("hello back".into()))
        .await?;
    let view = wait_for(&alice_client, |v| {
        v.row(&conversation)
            .is_some_and(|r| r.preview == "hello back")
    })
    .await?;
    info!(
        unread = view.unread_count(&conversation),
        messages = view.active_messages.len(),
        "alice received the reply"
    );

    alice_client.shutdown().await?;
    bob_client.shutdown().await?;
    drop((alice_auth, bob_auth));
    info!("done");
    Ok(())
}

fn start(store: Arc<dyn RemoteStore>, config: &ClientConfig, user: UserId) -> (SyncHandle, AuthProvider) {
    let auth = AuthProvider::new();
    let (handle, _task) = SyncOrchestrator::spawn(store, auth.subscribe(), config.clone());
    auth.sign_in(user);
    (handle, auth)
}

async fn wait_for(handle: &SyncHandle, ready: impl FnMut(&SyncView) -> bool) -> Result<SyncView> {
    let mut rx = handle.subscribe();
    let view = timeout(WAIT, rx.wait_for(ready))
        .await
        .context("timed out waiting for the view")??
        .clone();
    Ok(view)
}
