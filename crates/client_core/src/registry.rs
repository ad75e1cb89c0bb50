use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use shared::domain::{ConversationId, Participant, UserId};
use shared::protocol::ServerEvent;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::mutations::{DeletionLedger, ReactionLedger};
use crate::presence::PresenceTracker;
use crate::store::{AppendOutcome, MessageStore};
use crate::unread::{ScrollAction, UnreadTracker};
use crate::ClientEvent;

/// Current local user and selected peer.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    pub local: Option<Participant>,
    pub peer: Option<Participant>,
    pub active_conversation: Option<ConversationId>,
}

/// Mutable indirection for the current selection. Handlers read this
/// at delivery time instead of capturing a snapshot at bind time, so
/// an event arriving after a peer switch resolves against the peer
/// that is active when it is delivered.
#[derive(Debug, Default)]
pub struct SelectionCell {
    inner: Mutex<Selection>,
}

impl SelectionCell {
    pub async fn snapshot(&self) -> Selection {
        self.inner.lock().await.clone()
    }

    pub async fn set_local(&self, local: Option<Participant>) {
        let mut guard = self.inner.lock().await;
        guard.local = local;
        guard.peer = None;
        guard.active_conversation = None;
    }

    pub async fn set_peer(&self, peer: Participant, conversation: ConversationId) {
        let mut guard = self.inner.lock().await;
        guard.peer = Some(peer);
        guard.active_conversation = Some(conversation);
    }

    pub async fn clear_peer(&self) {
        let mut guard = self.inner.lock().await;
        guard.peer = None;
        guard.active_conversation = None;
    }

    /// Keeps the conversation header in step with presence events for
    /// the selected peer. Returns whether the header changed.
    pub async fn apply_peer_status(
        &self,
        user_id: &UserId,
        is_online: bool,
        last_active: Option<DateTime<Utc>>,
    ) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(peer) = guard.peer.as_mut() else {
            return false;
        };
        if peer.id != *user_id {
            return false;
        }
        let changed = peer.is_online != is_online
            || (last_active.is_some() && peer.last_active != last_active);
        peer.is_online = is_online;
        if last_active.is_some() {
            peer.last_active = last_active;
        }
        changed
    }
}

/// Everything a bound handler set may touch. Handlers resolve the
/// selection through the cell, never through captured copies.
#[derive(Clone)]
pub struct HandlerSet {
    pub selection: Arc<SelectionCell>,
    pub store: Arc<Mutex<MessageStore>>,
    pub presence: Arc<Mutex<PresenceTracker>>,
    pub unread: Arc<Mutex<UnreadTracker>>,
    pub reactions: Arc<Mutex<ReactionLedger>>,
    pub deletions: Arc<Mutex<DeletionLedger>>,
    pub events: broadcast::Sender<ClientEvent>,
}

/// Owns the one active handler set for the transport session.
///
/// Rebinding is unbind-then-bind, never additive, so duplicate
/// handlers cannot accumulate across identity changes. A failed
/// rebind leaves nothing bound.
#[derive(Default)]
pub struct SubscriptionRegistry {
    bound: Mutex<Option<HandlerSet>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active handler set. Fails closed: the previous
    /// set is removed before the new one is validated, and on error
    /// no handlers remain bound.
    pub async fn rebind(&self, set: HandlerSet) -> Result<()> {
        let mut guard = self.bound.lock().await;
        *guard = None;
        if set.selection.snapshot().await.local.is_none() {
            return Err(anyhow!(
                "cannot bind handlers without a local identity in the selection cell"
            ));
        }
        *guard = Some(set);
        Ok(())
    }

    pub async fn unbind(&self) {
        *self.bound.lock().await = None;
    }

    pub async fn is_bound(&self) -> bool {
        self.bound.lock().await.is_some()
    }

    /// Routes one authoritative broadcast into the bound components.
    /// Events arriving while nothing is bound are dropped and logged,
    /// never fatal.
    pub async fn dispatch(&self, event: ServerEvent) {
        let Some(set) = self.bound.lock().await.clone() else {
            warn!("registry: event dropped, no handler set bound");
            return;
        };

        match event {
            ServerEvent::ReceiveMessage(message) => {
                let selection = set.selection.snapshot().await;
                let Some(local) = selection.local else {
                    warn!("registry: receive_message without local identity dropped");
                    return;
                };
                let from_self = message.sender_name == local.name;
                let outcome = set.store.lock().await.append_incoming(message.clone());
                match outcome {
                    AppendOutcome::Appended => {
                        let _ = set.events.send(ClientEvent::MessageAppended {
                            message: message.clone(),
                        });
                        if from_self {
                            // own echo is always "seen"; follow it down
                            let _ = set.events.send(ClientEvent::AutoScrollRequested);
                            return;
                        }
                        let (action, count) = {
                            let mut unread = set.unread.lock().await;
                            let action = unread.on_incoming();
                            (action, unread.unread_count())
                        };
                        match action {
                            ScrollAction::StickToBottom => {
                                let _ = set.events.send(ClientEvent::AutoScrollRequested);
                            }
                            ScrollAction::Badge => {
                                let _ = set.events.send(ClientEvent::UnreadChanged { count });
                            }
                        }
                    }
                    AppendOutcome::Duplicate => {
                        debug!("registry: duplicate receive_message ignored");
                    }
                    AppendOutcome::ForeignConversation => {
                        if from_self {
                            // echo for a conversation we already left;
                            // interest was cancelled by the switch
                            debug!(
                                "registry: own echo for inactive conversation {} dropped",
                                message.conversation_id
                            );
                            return;
                        }
                        let _ = set.events.send(ClientEvent::CrossConversationNotice {
                            conversation_id: message.conversation_id.clone(),
                            sender_name: message.sender_name.clone(),
                            body_kind: message.body.kind_label(),
                        });
                    }
                }
            }
            ServerEvent::MessageUpdated(message) => {
                let Some(id) = message.id.clone() else {
                    warn!("registry: message_updated without id dropped");
                    return;
                };
                set.reactions.lock().await.confirm(&id);
                let reconciled = set
                    .store
                    .lock()
                    .await
                    .reconcile_update(message.clone())
                    .cloned();
                match reconciled {
                    Some(message) => {
                        let _ = set.events.send(ClientEvent::MessageUpdated { message });
                    }
                    None => {
                        debug!("registry: message_updated for inactive message {id} dropped");
                    }
                }
            }
            ServerEvent::DeleteMessageNotification {
                message_id,
                deleted_by,
            } => {
                set.deletions.lock().await.confirm(&message_id);
                let changed = set
                    .store
                    .lock()
                    .await
                    .reconcile_deletion(&message_id, deleted_by);
                if changed {
                    let _ = set.events.send(ClientEvent::MessageDeleted { message_id });
                }
            }
            ServerEvent::UserStatusUpdate {
                user_id,
                is_online,
                last_active,
            } => {
                let roster_changed = set
                    .presence
                    .lock()
                    .await
                    .apply_status(&user_id, is_online, last_active);
                let header_changed = set
                    .selection
                    .apply_peer_status(&user_id, is_online, last_active)
                    .await;
                if roster_changed || header_changed {
                    let _ = set.events.send(ClientEvent::PresenceChanged {
                        user_id,
                        is_online,
                    });
                }
            }
        }
    }
}
