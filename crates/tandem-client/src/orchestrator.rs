//! The sync loop.
//!
//! One tokio task owns every component and mutates them only while handling
//! a store snapshot, a command, an auth transition or a write completion.
//! Writes run in spawned tasks and report back through a channel, tagged with
//! the session epoch they were issued in.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tandem_shared::{
    Collection, ConversationId, DocumentPath, Message, MessageBody, PeerInfo, UserId,
};
use tandem_store::{RemoteStore, Snapshot, StoreError, Subscription, SubscriptionId, WatchTarget};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::auth::AuthState;
use crate::config::ClientConfig;
use crate::conversation_index::ConversationIndex;
use crate::directory::UserDirectory;
use crate::error::{Result, SyncError};
use crate::message_log::{decode_messages, MessageLog, ReadMark};
use crate::selection::SelectionController;
use crate::unread::UnreadTracker;
use crate::view::{FailureKind, SyncFailure, SyncView, ViewSource};
use crate::writes::{deliver_message, persist_read_mark, set_presence, soft_delete, with_retries, RetryPolicy};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands sent *into* the sync loop.
enum SyncCommand {
    SelectUser { peer: UserId, reply: Reply<ConversationId> },
    Search { query: String, reply: oneshot::Sender<()> },
    MarkAllRead { conversation_id: ConversationId, reply: Reply<()> },
    RetryFailed { conversation_id: ConversationId, reply: Reply<()> },
    SendMessage { peer: UserId, body: MessageBody, reply: Reply<Uuid> },
    DeleteConversation { conversation_id: ConversationId, reply: Reply<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable front end of a running sync loop.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    view: watch::Receiver<SyncView>,
}

impl SyncHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SyncCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Open the conversation with `peer`. Resolves once the selection is
    /// applied; the read mark it may trigger settles in the background.
    pub async fn select_user(&self, peer: &UserId) -> Result<ConversationId> {
        let peer = peer.clone();
        self.request(|reply| SyncCommand::SelectUser { peer, reply }).await?
    }

    pub async fn search(&self, query: &str) -> Result<()> {
        let query = query.to_string();
        self.request(|reply| SyncCommand::Search { query, reply }).await
    }

    /// Mark every peer message in the conversation read and wait for the
    /// store to accept it.
    pub async fn mark_all_read(&self, conversation_id: &ConversationId) -> Result<()> {
        let conversation_id = conversation_id.clone();
        self.request(|reply| SyncCommand::MarkAllRead { conversation_id, reply })
            .await?
    }

    /// Re-issue a read mark that failed to persist.
    pub async fn retry_failed(&self, conversation_id: &ConversationId) -> Result<()> {
        let conversation_id = conversation_id.clone();
        self.request(|reply| SyncCommand::RetryFailed { conversation_id, reply })
            .await?
    }

    /// Send a message to `peer`. Returns the message id once it is stored.
    pub async fn send_message(&self, peer: &UserId, body: MessageBody) -> Result<Uuid> {
        let peer = peer.clone();
        self.request(|reply| SyncCommand::SendMessage { peer, body, reply })
            .await?
    }

    pub async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let conversation_id = conversation_id.clone();
        self.request(|reply| SyncCommand::DeleteConversation { conversation_id, reply })
            .await?
    }

    /// End the session and stop the loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SyncCommand::Shutdown { reply }).await
    }

    /// Latest published view.
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }
}

// ---------------------------------------------------------------------------
// Write completions
// ---------------------------------------------------------------------------

enum Settled {
    ReadMark { mark: ReadMark, reply: Option<Reply<()>> },
    Send { message_id: Uuid, reply: Reply<Uuid> },
    Delete { reply: Reply<()> },
}

struct WriteOutcome {
    epoch: u64,
    conversation_id: ConversationId,
    result: std::result::Result<(), StoreError>,
    settled: Settled,
}

impl Settled {
    fn kind(&self) -> FailureKind {
        match self {
            Settled::ReadMark { .. } => FailureKind::ReadMark,
            Settled::Send { .. } => FailureKind::Send,
            Settled::Delete { .. } => FailureKind::Delete,
        }
    }

    fn reject(self, err: SyncError) {
        match self {
            Settled::ReadMark { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
            }
            Settled::Send { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Settled::Delete { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// A validated message ready to be written.
struct Outgoing {
    epoch: u64,
    conversation_id: ConversationId,
    message: Message,
    sender: PeerInfo,
    recipient: PeerInfo,
}

/// Spawns write tasks that report to the loop.
struct Writer {
    store: Arc<dyn RemoteStore>,
    outcomes: mpsc::UnboundedSender<WriteOutcome>,
    policy: RetryPolicy,
}

impl Writer {
    fn read_mark(&self, epoch: u64, mark: ReadMark, reply: Option<Reply<()>>) {
        let store = self.store.clone();
        let outcomes = self.outcomes.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            let result = with_retries(policy, "read mark", || {
                persist_read_mark(store.as_ref(), &mark.conversation_id, &mark.reader)
            })
            .await;
            let _ = outcomes.send(WriteOutcome {
                epoch,
                conversation_id: mark.conversation_id.clone(),
                result,
                settled: Settled::ReadMark { mark, reply },
            });
        });
    }

    fn send(&self, outgoing: Outgoing, reply: Reply<Uuid>) {
        let store = self.store.clone();
        let outcomes = self.outcomes.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            let Outgoing {
                epoch,
                conversation_id,
                message,
                sender,
                recipient,
            } = outgoing;
            let result = deliver_message(
                store.as_ref(),
                policy,
                &conversation_id,
                &message,
                &sender,
                &recipient,
            )
            .await;
            let _ = outcomes.send(WriteOutcome {
                epoch,
                conversation_id,
                result,
                settled: Settled::Send {
                    message_id: message.id,
                    reply,
                },
            });
        });
    }

    fn delete(&self, epoch: u64, owner: UserId, conversation_id: ConversationId, reply: Reply<()>) {
        let store = self.store.clone();
        let outcomes = self.outcomes.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            let result = with_retries(policy, "delete conversation", || {
                soft_delete(store.as_ref(), &owner, &conversation_id)
            })
            .await;
            let _ = outcomes.send(WriteOutcome {
                epoch,
                conversation_id,
                result,
                settled: Settled::Delete { reply },
            });
        });
    }

    /// Fire-and-forget presence update.
    fn presence(&self, user: UserId, online: bool) {
        let store = self.store.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            if let Err(e) = with_retries(policy, "presence", || set_presence(store.as_ref(), &user, online)).await {
                warn!(user = %user.short(), online, error = %e, "presence update failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Users,
    Conversations,
    Chats,
}

/// Everything that belongs to one signed-in user. Dropping it cancels every
/// subscription.
struct Session {
    epoch: u64,
    user_id: UserId,
    directory: UserDirectory,
    index: ConversationIndex,
    log: MessageLog,
    unread: UnreadTracker,
    selection: SelectionController,
    failures: Vec<SyncFailure>,
    feeds: HashMap<SubscriptionId, Feed>,
    base_subscriptions: Vec<Subscription>,
    chat_subscriptions: Vec<Subscription>,
    watched: BTreeSet<ConversationId>,
}

impl Session {
    fn new(epoch: u64, user_id: UserId) -> Self {
        Self {
            epoch,
            directory: UserDirectory::new(),
            index: ConversationIndex::new(user_id.clone()),
            log: MessageLog::new(user_id.clone()),
            unread: UnreadTracker::new(),
            selection: SelectionController::new(user_id.clone()),
            failures: Vec::new(),
            feeds: HashMap::new(),
            base_subscriptions: Vec::new(),
            chat_subscriptions: Vec::new(),
            watched: BTreeSet::new(),
            user_id,
        }
    }

    fn watch(
        &mut self,
        store: &dyn RemoteStore,
        sink: &mpsc::UnboundedSender<Snapshot>,
        target: WatchTarget,
        feed: Feed,
    ) -> Option<Subscription> {
        match store.watch(target, sink.clone()) {
            Ok(sub) => {
                self.feeds.insert(sub.id(), feed);
                Some(sub)
            }
            Err(e) => {
                warn!(?feed, error = %e, "subscription failed");
                None
            }
        }
    }

    /// Subscribe to the directory and to this user's conversation list.
    fn start(&mut self, store: &dyn RemoteStore, sink: &mpsc::UnboundedSender<Snapshot>) {
        let users = self.watch(store, sink, WatchTarget::Collection(Collection::Users), Feed::Users);
        let index = self.watch(
            store,
            sink,
            WatchTarget::Document(DocumentPath::user_chats(&self.user_id)),
            Feed::Conversations,
        );
        self.base_subscriptions.extend(users);
        self.base_subscriptions.extend(index);
    }

    /// Re-subscribe `chats` when the set of ids to watch changed. The set is
    /// every known conversation plus the active one, split into batches of at
    /// most `batch` ids.
    fn resync_chats(
        &mut self,
        store: &dyn RemoteStore,
        sink: &mpsc::UnboundedSender<Snapshot>,
        batch: usize,
    ) {
        let mut wanted = self.index.known_ids();
        if let Some(active) = self.selection.active() {
            wanted.insert(active.clone());
        }
        if wanted == self.watched {
            return;
        }

        for sub in self.chat_subscriptions.drain(..) {
            self.feeds.remove(&sub.id());
        }

        let ids: Vec<&ConversationId> = wanted.iter().collect();
        let mut subs = Vec::new();
        for chunk in ids.chunks(batch.max(1)) {
            let keys = chunk.iter().map(|id| id.as_str().to_string()).collect();
            let target = WatchTarget::Keys {
                collection: Collection::Chats,
                keys,
            };
            subs.extend(self.watch(store, sink, target, Feed::Chats));
        }
        debug!(
            conversations = wanted.len(),
            subscriptions = subs.len(),
            "chat subscriptions refreshed"
        );

        self.chat_subscriptions = subs;
        self.log.retain(&wanted);
        self.watched = wanted;
    }

    /// Optimistically mark the conversation read and persist the mark.
    fn mark_read(&mut self, writer: &Writer, conversation_id: &ConversationId, reply: Option<Reply<()>>) {
        let mark = self.log.mark_all_read_from_peer(conversation_id);
        self.failures
            .retain(|f| !(f.kind == FailureKind::ReadMark && &f.conversation_id == conversation_id));
        writer.read_mark(self.epoch, mark, reply);
    }

    fn peer_info(&self, uid: &UserId) -> Option<PeerInfo> {
        if let Some(user) = self.directory.get(uid) {
            return Some(PeerInfo::from(user));
        }
        let conversation_id = ConversationId::canonical(&self.user_id, uid);
        self.index.get(&conversation_id).map(|s| s.user_info.clone())
    }

    fn view(&self, query: &str) -> SyncView {
        ViewSource {
            user: &self.user_id,
            query,
            directory: &self.directory,
            index: &self.index,
            log: &self.log,
            unread: &self.unread,
            selection: &self.selection,
            failures: &self.failures,
        }
        .project()
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct SyncOrchestrator {
    config: ClientConfig,
    auth: watch::Receiver<AuthState>,
    auth_open: bool,
    commands: mpsc::Receiver<SyncCommand>,
    snapshot_tx: mpsc::UnboundedSender<Snapshot>,
    snapshot_rx: mpsc::UnboundedReceiver<Snapshot>,
    outcome_rx: mpsc::UnboundedReceiver<WriteOutcome>,
    writer: Writer,
    view_tx: watch::Sender<SyncView>,
    epoch: u64,
    query: String,
    session: Option<Session>,
}

impl SyncOrchestrator {
    /// Start the sync loop in a background task.
    ///
    /// Nothing is subscribed until `auth` reports a signed-in user. The loop
    /// runs until [`SyncHandle::shutdown`] or until every handle is dropped.
    pub fn spawn(
        store: Arc<dyn RemoteStore>,
        auth: watch::Receiver<AuthState>,
        config: ClientConfig,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<SyncCommand>(64);
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SyncView::default());

        let writer = Writer {
            store,
            outcomes: outcome_tx,
            policy: config.retry_policy(),
        };

        let orchestrator = SyncOrchestrator {
            config,
            auth,
            auth_open: true,
            commands: cmd_rx,
            snapshot_tx,
            snapshot_rx,
            outcome_rx,
            writer,
            view_tx,
            epoch: 0,
            query: String::new(),
            session: None,
        };

        let task = tokio::spawn(orchestrator.run());
        let handle = SyncHandle {
            commands: cmd_tx,
            view: view_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("sync loop started");

        let initial = self.auth.borrow_and_update().clone();
        self.on_auth(initial);

        loop {
            // Auth and store input drain before commands, so a command always
            // sees every snapshot that was already delivered.
            tokio::select! {
                biased;

                changed = self.auth.changed(), if self.auth_open => {
                    match changed {
                        Ok(()) => {
                            let state = self.auth.borrow_and_update().clone();
                            self.on_auth(state);
                        }
                        Err(_) => {
                            debug!("auth provider dropped");
                            self.auth_open = false;
                        }
                    }
                }

                Some(snapshot) = self.snapshot_rx.recv() => {
                    self.on_snapshot(snapshot);
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.on_write_outcome(outcome);
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Some(reply) = self.on_command(cmd) {
                                info!("sync loop shutdown requested");
                                self.shutdown().await;
                                let _ = reply.send(());
                                break;
                            }
                        }
                        None => {
                            info!("all handles dropped, stopping sync loop");
                            self.shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!("sync loop stopped");
    }

    fn publish(&self) {
        let view = match &self.session {
            Some(session) => session.view(&self.query),
            None => SyncView {
                loading: *self.auth.borrow() == AuthState::Loading,
                ..SyncView::default()
            },
        };
        self.view_tx.send_replace(view);
    }

    // --- auth -------------------------------------------------------------

    fn on_auth(&mut self, state: AuthState) {
        let current = self.session.as_ref().map(|s| &s.user_id);
        if current == state.user() {
            self.publish();
            return;
        }

        if let Some(user) = self.end_session() {
            self.writer.presence(user, false);
        }

        if let Some(user) = state.user().cloned() {
            self.epoch += 1;
            info!(user = %user.short(), epoch = self.epoch, "session started");

            let mut session = Session::new(self.epoch, user.clone());
            session.start(self.writer.store.as_ref(), &self.snapshot_tx);
            self.session = Some(session);
            self.writer.presence(user, true);
        }

        self.publish();
    }

    /// Drop the current session, cancelling its subscriptions. Returns the
    /// user it belonged to.
    fn end_session(&mut self) -> Option<UserId> {
        let session = self.session.take()?;
        self.query.clear();
        info!(
            user = %session.user_id.short(),
            epoch = session.epoch,
            subscriptions = session.base_subscriptions.len() + session.chat_subscriptions.len(),
            "session ended"
        );
        Some(session.user_id)
    }

    async fn shutdown(&mut self) {
        if let Some(user) = self.end_session() {
            let store = self.writer.store.as_ref();
            if let Err(e) = with_retries(self.writer.policy, "presence", || set_presence(store, &user, false)).await {
                warn!(user = %user.short(), error = %e, "presence update failed");
            }
        }
        self.publish();
    }

    // --- snapshots --------------------------------------------------------

    fn on_snapshot(&mut self, snapshot: Snapshot) {
        let Some(session) = self.session.as_mut() else {
            trace!(subscription = snapshot.subscription, "snapshot without session");
            return;
        };
        let Some(feed) = session.feeds.get(&snapshot.subscription).copied() else {
            trace!(subscription = snapshot.subscription, "snapshot from cancelled subscription");
            return;
        };

        match feed {
            Feed::Users => {
                let skipped = session.directory.on_update(&snapshot.documents);
                debug!(users = session.directory.len(), skipped, "directory updated");
            }
            Feed::Conversations => {
                let path = DocumentPath::user_chats(&session.user_id);
                let data = snapshot
                    .documents
                    .iter()
                    .find(|d| d.path == path)
                    .and_then(|d| d.data.as_ref());
                let skipped = session.index.apply_document(data);
                debug!(
                    conversations = session.index.known_ids().len(),
                    skipped, "conversation index updated"
                );
                session.resync_chats(
                    self.writer.store.as_ref(),
                    &self.snapshot_tx,
                    self.config.max_ids_per_query,
                );
            }
            Feed::Chats => {
                let mut touched_active = false;
                for doc in &snapshot.documents {
                    let id = ConversationId(doc.path.key.clone());
                    match &doc.data {
                        Some(data) => session.log.append_or_replace(&id, decode_messages(&doc.path, data)),
                        None => session.log.remove(&id),
                    }
                    touched_active |= session.selection.active() == Some(&id);
                }

                if touched_active && self.config.mark_active_on_receive {
                    if let Some(active) = session.selection.active().cloned() {
                        if session.log.unread_from_peer(&active) > 0 {
                            debug!(conversation = %active, "marking newly received messages read");
                            session.mark_read(&self.writer, &active, None);
                        }
                    }
                }
            }
        }

        if matches!(feed, Feed::Users | Feed::Conversations) {
            if let Some(outcome) = session
                .selection
                .maybe_auto_select(&session.directory, &session.index)
            {
                session.resync_chats(
                    self.writer.store.as_ref(),
                    &self.snapshot_tx,
                    self.config.max_ids_per_query,
                );
                session.mark_read(&self.writer, &outcome.conversation_id, None);
            }
        }

        session
            .unread
            .recompute(&session.log, session.selection.active());
        self.publish();
    }

    // --- commands ---------------------------------------------------------

    /// Handle one command. Returns the reply channel of a shutdown request,
    /// which the loop answers after tearing down.
    fn on_command(&mut self, cmd: SyncCommand) -> Option<oneshot::Sender<()>> {
        match cmd {
            SyncCommand::Search { query, reply } => {
                debug!(query = %query, "search");
                self.query = query;
                self.publish();
                let _ = reply.send(());
            }
            SyncCommand::SelectUser { peer, reply } => {
                let result = self.select_user(&peer);
                let _ = reply.send(result);
            }
            SyncCommand::MarkAllRead { conversation_id, reply } => {
                self.mark_all_read(&conversation_id, reply, false);
            }
            SyncCommand::RetryFailed { conversation_id, reply } => {
                self.mark_all_read(&conversation_id, reply, true);
            }
            SyncCommand::SendMessage { peer, body, reply } => {
                self.send_message(peer, body, reply);
            }
            SyncCommand::DeleteConversation { conversation_id, reply } => {
                match self.session.as_ref() {
                    Some(session) => {
                        info!(conversation = %conversation_id, "deleting conversation");
                        self.writer
                            .delete(session.epoch, session.user_id.clone(), conversation_id, reply);
                    }
                    None => {
                        let _ = reply.send(Err(SyncError::NotSignedIn));
                    }
                }
            }
            SyncCommand::Shutdown { reply } => return Some(reply),
        }
        None
    }

    fn select_user(&mut self, peer: &UserId) -> Result<ConversationId> {
        let session = self.session.as_mut().ok_or(SyncError::NotSignedIn)?;
        if *peer == session.user_id {
            return Err(SyncError::SelfConversation);
        }
        if session.directory.is_loaded() && session.directory.get(peer).is_none() {
            return Err(SyncError::UnknownPeer(peer.clone()));
        }

        let conversation_id = ConversationId::canonical(&session.user_id, peer);
        let unread_before = session.unread.unread_count(&conversation_id);
        let outcome = session.selection.select_user(peer, unread_before);

        session.resync_chats(
            self.writer.store.as_ref(),
            &self.snapshot_tx,
            self.config.max_ids_per_query,
        );
        if outcome.mark_read {
            session.mark_read(&self.writer, &conversation_id, None);
        }
        session
            .unread
            .recompute(&session.log, session.selection.active());
        self.publish();
        Ok(conversation_id)
    }

    fn mark_all_read(&mut self, conversation_id: &ConversationId, reply: Reply<()>, retry: bool) {
        let Some(session) = self.session.as_mut() else {
            let _ = reply.send(Err(SyncError::NotSignedIn));
            return;
        };
        if retry {
            info!(
                conversation = %conversation_id,
                failed = session.log.failed_reads(conversation_id),
                "retrying read mark"
            );
        }
        session.mark_read(&self.writer, conversation_id, Some(reply));
        session
            .unread
            .recompute(&session.log, session.selection.active());
        self.publish();
    }

    fn send_message(&mut self, peer: UserId, body: MessageBody, reply: Reply<Uuid>) {
        match self.prepare_send(&peer, body) {
            Ok(outgoing) => {
                debug!(
                    conversation = %outgoing.conversation_id,
                    message = %outgoing.message.id,
                    "sending message"
                );
                self.writer.send(outgoing, reply);
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn prepare_send(&self, peer: &UserId, body: MessageBody) -> Result<Outgoing> {
        let session = self.session.as_ref().ok_or(SyncError::NotSignedIn)?;
        if *peer == session.user_id {
            return Err(SyncError::SelfConversation);
        }
        let recipient = session
            .peer_info(peer)
            .ok_or_else(|| SyncError::UnknownPeer(peer.clone()))?;
        let sender = session.peer_info(&session.user_id).unwrap_or_else(|| PeerInfo {
            uid: session.user_id.clone(),
            display_name: session.user_id.to_string(),
            photo_url: None,
        });
        let message = Message::new(session.user_id.clone(), body, Utc::now())?;
        Ok(Outgoing {
            epoch: session.epoch,
            conversation_id: ConversationId::canonical(&session.user_id, peer),
            message,
            sender,
            recipient,
        })
    }

    // --- write completions ------------------------------------------------

    fn on_write_outcome(&mut self, outcome: WriteOutcome) {
        let WriteOutcome {
            epoch,
            conversation_id,
            result,
            settled,
        } = outcome;

        let Some(session) = self.session.as_mut().filter(|s| s.epoch == epoch) else {
            debug!(conversation = %conversation_id, epoch, "discarding write result from ended session");
            settled.reject(SyncError::AuthBoundary);
            return;
        };

        let kind = settled.kind();
        match result {
            Ok(()) => {
                match settled {
                    Settled::ReadMark { mark, reply } => {
                        session.log.settle(&mark, true);
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    Settled::Send { message_id, reply } => {
                        debug!(conversation = %conversation_id, message = %message_id, "message stored");
                        let _ = reply.send(Ok(message_id));
                    }
                    Settled::Delete { reply } => {
                        info!(conversation = %conversation_id, "conversation deleted");
                        let _ = reply.send(Ok(()));
                    }
                }
                session
                    .failures
                    .retain(|f| !(f.kind == kind && f.conversation_id == conversation_id));
            }
            Err(source) => {
                warn!(conversation = %conversation_id, ?kind, error = %source, "write failed");
                // A read mark superseded by a newer one leaves nothing to retry.
                let outstanding = match settled {
                    Settled::ReadMark { ref mark, .. } => session.log.settle(mark, false) > 0,
                    _ => true,
                };
                if outstanding {
                    session.failures.push(SyncFailure {
                        conversation_id: conversation_id.clone(),
                        kind,
                        error: source.to_string(),
                        at: Utc::now(),
                    });
                }
                settled.reject(SyncError::WriteFailure {
                    conversation_id,
                    source,
                });
            }
        }

        session
            .unread
            .recompute(&session.log, session.selection.active());
        self.publish();
    }
}
