use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use shared::domain::{ConversationId, MessageId, Participant, UserId};
use shared::error::SyncError;
use shared::protocol::{ClientCommand, GeoPoint, Message, MessageBody, ReplySnapshot};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

pub mod mutations;
pub mod portal;
pub mod presence;
pub mod registry;
pub mod store;
pub mod transport;
pub mod unread;

use mutations::{DeletionLedger, ReactionLedger, ReplyContext};
use portal::{MissingPortalApi, PortalApi, UploadDraft};
use presence::PresenceTracker;
use registry::{HandlerSet, SelectionCell, SubscriptionRegistry};
use store::MessageStore;
use transport::{TransportConfig, TransportSession};
use unread::UnreadTracker;

/// State-change notifications for whatever shell renders the
/// conversation.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationRefreshed {
        conversation_id: ConversationId,
        message_count: usize,
    },
    MessageAppended {
        message: Message,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        message_id: MessageId,
    },
    /// A message arrived for a conversation other than the open one;
    /// toast-equivalent signal, never merged into the active store.
    CrossConversationNotice {
        conversation_id: ConversationId,
        sender_name: String,
        body_kind: &'static str,
    },
    PresenceChanged {
        user_id: UserId,
        is_online: bool,
    },
    UnreadChanged {
        count: u32,
    },
    AutoScrollRequested,
    Error(String),
}

/// Client-resident synchronization engine for pairwise conversations.
///
/// Single owner of the transport session and its handler registry;
/// all mutation goes through the public operations here, so two
/// competing rebinds can never interleave. UI actions issue protocol
/// commands, the server broadcasts authoritative events, and the
/// registry reconciles them into the component state.
pub struct ChatClient {
    api: Arc<dyn PortalApi>,
    selection: Arc<SelectionCell>,
    store: Arc<Mutex<MessageStore>>,
    presence: Arc<Mutex<PresenceTracker>>,
    unread: Arc<Mutex<UnreadTracker>>,
    reply: Mutex<ReplyContext>,
    reactions: Arc<Mutex<ReactionLedger>>,
    deletions: Arc<Mutex<DeletionLedger>>,
    registry: Arc<SubscriptionRegistry>,
    transport: Mutex<Option<TransportSession>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(api: Arc<dyn PortalApi>) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            api,
            selection: Arc::new(SelectionCell::default()),
            store: Arc::new(Mutex::new(MessageStore::default())),
            presence: Arc::new(Mutex::new(PresenceTracker::default())),
            unread: Arc::new(Mutex::new(UnreadTracker::default())),
            reply: Mutex::new(ReplyContext::default()),
            reactions: Arc::new(Mutex::new(ReactionLedger::default())),
            deletions: Arc::new(Mutex::new(DeletionLedger::default())),
            registry: Arc::new(SubscriptionRegistry::new()),
            transport: Mutex::new(None),
            events,
        })
    }

    pub fn new_detached() -> Arc<Self> {
        Self::new(Arc::new(MissingPortalApi))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Opens the authenticated session: seeds the contact roster,
    /// binds the handler set and starts the one transport session.
    /// A second call while connected is a coding error and fails.
    pub async fn connect(&self, server_url: &str, local: Participant) -> Result<()> {
        {
            let transport = self.transport.lock().await;
            if transport.is_some() {
                return Err(anyhow!(
                    "transport session already active; exactly one session per authenticated client"
                ));
            }
        }

        self.selection.set_local(Some(local.clone())).await;

        match self.api.fetch_contacts(&local.id).await {
            Ok(contacts) => self.presence.lock().await.load_roster(contacts),
            Err(err) => {
                // non-fatal: the roster fills in from presence events
                warn!("presence: contact list fetch failed: {err}");
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("contact list unavailable: {err}")));
            }
        }

        self.registry.rebind(self.handler_set()).await?;

        let session = match TransportSession::start(
            TransportConfig {
                server_url: server_url.to_string(),
                user_id: local.id,
            },
            Arc::clone(&self.registry),
            self.events.clone(),
        ) {
            Ok(session) => session,
            Err(err) => {
                // unwind: a failed connect must leave nothing behind
                self.registry.unbind().await;
                self.selection.set_local(None).await;
                self.presence.lock().await.clear();
                return Err(err);
            }
        };
        *self.transport.lock().await = Some(session);
        Ok(())
    }

    /// Tears the session down and unbinds all handlers.
    pub async fn disconnect(&self) {
        if let Some(session) = self.transport.lock().await.take() {
            session.shutdown().await;
        }
        self.registry.unbind().await;
        self.selection.set_local(None).await;
        self.store.lock().await.clear();
        self.presence.lock().await.clear();
        self.unread.lock().await.on_conversation_switch();
        self.reply.lock().await.cancel();
        self.reactions.lock().await.clear();
        self.deletions.lock().await.clear();
    }

    /// Selects a peer: derives the conversation key, resets unread and
    /// composer state, and refetches the full history. A fetch that
    /// resolves after a later switch is discarded, not merged.
    pub async fn select_peer(&self, peer: Participant) -> Result<()> {
        let local = self.local_identity().await?;
        let conversation_id = ConversationId::derive(&local.id, &peer.id)?;
        self.selection
            .set_peer(peer, conversation_id.clone())
            .await;
        self.unread.lock().await.on_conversation_switch();
        self.reply.lock().await.cancel();
        self.reactions.lock().await.clear();
        self.deletions.lock().await.clear();
        let _ = self.events.send(ClientEvent::UnreadChanged { count: 0 });

        let history = match self.api.fetch_history(&conversation_id).await {
            Ok(history) => history,
            Err(err) => {
                let failure = SyncError::HistoryFetch {
                    conversation_id: conversation_id.clone(),
                    reason: err.to_string(),
                };
                warn!("store: {failure}");
                let _ = self.events.send(ClientEvent::Error(failure.to_string()));
                Vec::new()
            }
        };

        // guard against a stale response racing a later switch
        let snapshot = self.selection.snapshot().await;
        if snapshot.active_conversation.as_ref() != Some(&conversation_id) {
            debug!("store: stale history fetch for {conversation_id} discarded");
            return Ok(());
        }

        let message_count = {
            let mut store = self.store.lock().await;
            store.load_history(conversation_id.clone(), history);
            store.len()
        };
        let _ = self.events.send(ClientEvent::ConversationRefreshed {
            conversation_id,
            message_count,
        });
        Ok(())
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_body(MessageBody::Text(text.into())).await
    }

    pub async fn send_location(&self, lat: f64, lng: f64) -> Result<()> {
        self.send_body(MessageBody::Location(GeoPoint { lat, lng }))
            .await
    }

    /// Uploads the drafts and sends one message per stored file. An
    /// upload failure is surfaced and nothing is sent.
    pub async fn send_attachments(&self, files: Vec<UploadDraft>) -> Result<()> {
        let first_name = files
            .first()
            .map(|file| file.file_name.clone())
            .ok_or_else(|| anyhow!("no files to upload"))?;
        let uploaded = match self.api.upload_files(files).await {
            Ok(uploaded) => uploaded,
            Err(err) => {
                let failure = SyncError::Upload {
                    file_name: first_name,
                    reason: err.to_string(),
                };
                let _ = self.events.send(ClientEvent::Error(failure.to_string()));
                return Err(failure.into());
            }
        };
        for file in uploaded {
            self.send_body(file.into_body()).await?;
        }
        Ok(())
    }

    /// Builds the draft (attaching any captured reply snapshot),
    /// issues the outbound command and clears composer state. The
    /// draft is not appended locally; the server echo delivers the
    /// sender's own message and dedup-by-id keeps it single.
    async fn send_body(&self, body: MessageBody) -> Result<()> {
        let (local, peer, conversation_id) = self.active_context().await?;
        let reply_snapshot = self.reply.lock().await.take();
        let draft = Message {
            id: None,
            conversation_id,
            sender_name: local.name,
            receiver_name: peer.name,
            sender_role: local.role,
            body,
            timestamp: Utc::now(),
            reply_snapshot,
            liked_by: BTreeSet::new(),
            is_deleted: false,
            deleted_by: None,
        };
        debug!(
            "store: send issued for {}; awaiting server echo",
            draft.conversation_id
        );
        self.send_command(ClientCommand::SendMessage(draft)).await
    }

    /// Captures the reply target. Tombstoned and unconfirmed messages
    /// cannot be replied to.
    pub async fn begin_reply(&self, message_id: &MessageId) -> Result<()> {
        let snapshot = {
            let store = self.store.lock().await;
            let target = store
                .get(message_id)
                .ok_or_else(|| anyhow!("reply target {message_id} not in the open conversation"))?;
            if target.is_deleted {
                return Err(anyhow!("cannot reply to a deleted message"));
            }
            target
                .snapshot()
                .ok_or_else(|| anyhow!("reply target {message_id} is not server-confirmed"))?
        };
        self.reply.lock().await.begin(snapshot);
        Ok(())
    }

    pub async fn cancel_reply(&self) {
        self.reply.lock().await.cancel();
    }

    pub async fn pending_reply(&self) -> Option<ReplySnapshot> {
        self.reply.lock().await.pending().cloned()
    }

    /// Server-first reaction toggle: no local flip, the authoritative
    /// `message_updated` broadcast carries the resolved set.
    pub async fn toggle_like(&self, message_id: MessageId) -> Result<()> {
        let local = self.local_identity().await?;
        if self.store.lock().await.get(&message_id).is_none() {
            return Err(anyhow!(
                "like target {message_id} not in the open conversation"
            ));
        }
        if !self.reactions.lock().await.begin(message_id.clone()) {
            debug!("reactions: toggle for {message_id} already awaiting confirmation");
            return Ok(());
        }
        let command = ClientCommand::LikeMessage {
            message_id: message_id.clone(),
            user_id: local.id,
            user_name: local.name,
        };
        if let Err(err) = self.send_command(command).await {
            self.reactions.lock().await.confirm(&message_id);
            return Err(err);
        }
        Ok(())
    }

    /// Optimistic-first soft delete: immediate local tombstone, then
    /// the idempotent notification confirms it.
    pub async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        let local = self.local_identity().await?;
        if self.store.lock().await.get(&message_id).is_none() {
            return Err(anyhow!(
                "delete target {message_id} not in the open conversation"
            ));
        }
        let changed = self
            .store
            .lock()
            .await
            .mark_deleted_locally(&message_id, &local.name);
        if changed {
            let _ = self.events.send(ClientEvent::MessageDeleted {
                message_id: message_id.clone(),
            });
        }
        self.deletions.lock().await.begin(message_id.clone());
        self.send_command(ClientCommand::DeleteMessage {
            message_id,
            user_name: local.name,
        })
        .await
    }

    /// Viewport scroll position changed; `distance_from_bottom` in
    /// pixels.
    pub async fn scrolled(&self, distance_from_bottom: f64) {
        let mut unread = self.unread.lock().await;
        let had_unread = unread.unread_count() > 0;
        let at_bottom = unread.on_scroll(distance_from_bottom);
        if at_bottom && had_unread {
            let _ = self.events.send(ClientEvent::UnreadChanged { count: 0 });
        }
    }

    pub async fn unread_count(&self) -> u32 {
        self.unread.lock().await.unread_count()
    }

    pub async fn at_bottom(&self) -> bool {
        self.unread.lock().await.at_bottom()
    }

    pub async fn contacts(&self) -> Vec<Participant> {
        self.presence.lock().await.contacts()
    }

    pub async fn selected_peer(&self) -> Option<Participant> {
        self.selection.snapshot().await.peer
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.selection.snapshot().await.active_conversation
    }

    pub async fn conversation_messages(&self) -> Vec<Message> {
        self.store.lock().await.messages().to_vec()
    }

    fn handler_set(&self) -> HandlerSet {
        HandlerSet {
            selection: Arc::clone(&self.selection),
            store: Arc::clone(&self.store),
            presence: Arc::clone(&self.presence),
            unread: Arc::clone(&self.unread),
            reactions: Arc::clone(&self.reactions),
            deletions: Arc::clone(&self.deletions),
            events: self.events.clone(),
        }
    }

    async fn local_identity(&self) -> Result<Participant> {
        self.selection
            .snapshot()
            .await
            .local
            .ok_or_else(|| anyhow!("not authenticated: missing local identity"))
    }

    async fn active_context(&self) -> Result<(Participant, Participant, ConversationId)> {
        let snapshot = self.selection.snapshot().await;
        let local = snapshot
            .local
            .ok_or_else(|| anyhow!("not authenticated: missing local identity"))?;
        let peer = snapshot
            .peer
            .ok_or_else(|| anyhow!("no conversation selected"))?;
        let conversation_id = snapshot
            .active_conversation
            .ok_or_else(|| anyhow!("no conversation selected"))?;
        Ok((local, peer, conversation_id))
    }

    async fn send_command(&self, command: ClientCommand) -> Result<()> {
        let guard = self.transport.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| anyhow!("not connected: transport session missing"))?;
        session.send(command)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
