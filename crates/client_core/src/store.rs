use std::collections::HashMap;

use shared::domain::{ConversationId, MessageId};
use shared::protocol::Message;
use tracing::{debug, warn};

/// Result of offering a broadcast message to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// An entry with the same id is already stored; the delivery is
    /// ignored.
    Duplicate,
    /// The message belongs to a conversation other than the active
    /// one and must not enter the store.
    ForeignConversation,
}

/// Ordered, deduplicated message collection for the active
/// conversation.
///
/// Order is insertion order, which equals arrival order on the single
/// authoritative channel. Messages are never re-sorted by timestamp,
/// so clock skew between writers cannot reorder an open conversation.
#[derive(Debug, Default)]
pub struct MessageStore {
    active_conversation: Option<ConversationId>,
    messages: Vec<Message>,
    by_id: HashMap<MessageId, usize>,
}

impl MessageStore {
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active_conversation.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.by_id.get(id).map(|&index| &self.messages[index])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replaces the whole collection for a just-selected conversation.
    /// Supersedes any optimistic state left over from a previous
    /// selection.
    pub fn load_history(&mut self, conversation_id: ConversationId, history: Vec<Message>) {
        self.active_conversation = Some(conversation_id);
        self.messages = Vec::with_capacity(history.len());
        self.by_id = HashMap::with_capacity(history.len());
        for message in history {
            if let Some(id) = &message.id {
                if self.by_id.contains_key(id) {
                    warn!("store: history contained duplicate id={id}; keeping first occurrence");
                    continue;
                }
                self.by_id.insert(id.clone(), self.messages.len());
            }
            self.messages.push(message);
        }
    }

    pub fn clear(&mut self) {
        self.active_conversation = None;
        self.messages.clear();
        self.by_id.clear();
    }

    /// Offers a broadcast message. Duplicate ids are ignored, and
    /// messages for other conversations never enter the store.
    pub fn append_incoming(&mut self, message: Message) -> AppendOutcome {
        let Some(active) = &self.active_conversation else {
            return AppendOutcome::ForeignConversation;
        };
        if message.conversation_id != *active {
            return AppendOutcome::ForeignConversation;
        }
        match &message.id {
            Some(id) => {
                if self.by_id.contains_key(id) {
                    debug!("store: ignored duplicate delivery id={id}");
                    return AppendOutcome::Duplicate;
                }
                self.by_id.insert(id.clone(), self.messages.len());
            }
            None => {
                warn!("store: broadcast without id accepted; duplicate deliveries undetectable");
            }
        }
        self.messages.push(message);
        AppendOutcome::Appended
    }

    /// Immediate optimistic tombstone for a local delete request.
    /// Returns whether anything changed; a second call is a no-op and
    /// never overwrites the recorded actor.
    pub fn mark_deleted_locally(&mut self, id: &MessageId, actor: &str) -> bool {
        let Some(&index) = self.by_id.get(id) else {
            return false;
        };
        let message = &mut self.messages[index];
        if message.is_deleted {
            return false;
        }
        message.is_deleted = true;
        message.deleted_by = Some(actor.to_string());
        true
    }

    /// Idempotent reconciliation of an authoritative deletion. Applies
    /// the broadcast actor only when the tombstone has none yet, so
    /// the local deleter's name is stable across the confirmation.
    pub fn reconcile_deletion(&mut self, id: &MessageId, deleted_by: Option<String>) -> bool {
        let Some(&index) = self.by_id.get(id) else {
            debug!("store: deletion notification for unknown id={id} dropped");
            return false;
        };
        let message = &mut self.messages[index];
        let mut changed = false;
        if !message.is_deleted {
            message.is_deleted = true;
            changed = true;
        }
        if message.deleted_by.is_none() {
            if let Some(actor) = deleted_by {
                message.deleted_by = Some(actor);
                changed = true;
            }
        }
        changed
    }

    /// Trust-the-server merge of one message keyed by id: the
    /// authoritative `liked_by` set and body replace the local copy
    /// wholesale, since the server is the order-resolving authority
    /// for concurrent reaction toggles. The reply snapshot is left
    /// untouched.
    pub fn reconcile_update(&mut self, updated: Message) -> Option<&Message> {
        let id = updated.id.as_ref()?;
        let &index = self.by_id.get(id)?;
        let current = &mut self.messages[index];
        current.liked_by = updated.liked_by;
        current.body = updated.body;
        Some(&self.messages[index])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use shared::domain::{Role, UserId};
    use shared::protocol::{MessageBody, ReplySnapshot};

    use super::*;

    fn conversation() -> ConversationId {
        ConversationId::derive(&UserId::from("u1"), &UserId::from("u2")).expect("derive")
    }

    fn message(id: &str, text: &str) -> Message {
        Message {
            id: Some(MessageId::from(id)),
            conversation_id: conversation(),
            sender_name: "u1".to_string(),
            receiver_name: "u2".to_string(),
            sender_role: Role::Patient,
            body: MessageBody::Text(text.to_string()),
            timestamp: "2025-03-01T10:00:00Z".parse().expect("timestamp"),
            reply_snapshot: None,
            liked_by: BTreeSet::new(),
            is_deleted: false,
            deleted_by: None,
        }
    }

    fn store_with_active_conversation() -> MessageStore {
        let mut store = MessageStore::default();
        store.load_history(conversation(), Vec::new());
        store
    }

    #[test]
    fn duplicate_delivery_is_stored_once() {
        let mut store = store_with_active_conversation();
        assert_eq!(
            store.append_incoming(message("m1", "hi")),
            AppendOutcome::Appended
        );
        assert_eq!(
            store.append_incoming(message("m1", "hi")),
            AppendOutcome::Duplicate
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn foreign_conversation_never_enters_store() {
        let mut store = store_with_active_conversation();
        let mut foreign = message("m2", "elsewhere");
        foreign.conversation_id = ConversationId("u1_u3".to_string());
        assert_eq!(
            store.append_incoming(foreign),
            AppendOutcome::ForeignConversation
        );
        assert!(store.is_empty());
    }

    #[test]
    fn history_load_replaces_previous_contents() {
        let mut store = store_with_active_conversation();
        store.append_incoming(message("m1", "old"));
        store.load_history(ConversationId("u1_u3".to_string()), vec![message("m5", "new")]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&MessageId::from("m1")).is_none());
        // index follows the replacement
        assert!(store.get(&MessageId::from("m5")).is_some());
    }

    #[test]
    fn local_delete_is_idempotent_with_stable_actor() {
        let mut store = store_with_active_conversation();
        store.append_incoming(message("m1", "hi"));
        assert!(store.mark_deleted_locally(&MessageId::from("m1"), "u1"));
        assert!(!store.mark_deleted_locally(&MessageId::from("m1"), "u2"));
        let stored = store.get(&MessageId::from("m1")).expect("stored");
        assert!(stored.is_deleted);
        assert_eq!(stored.deleted_by.as_deref(), Some("u1"));
    }

    #[test]
    fn double_deletion_notification_leaves_single_stable_tombstone() {
        let mut store = store_with_active_conversation();
        store.append_incoming(message("m1", "hi"));
        assert!(store.reconcile_deletion(&MessageId::from("m1"), Some("u1".to_string())));
        assert!(!store.reconcile_deletion(&MessageId::from("m1"), Some("u2".to_string())));
        let stored = store.get(&MessageId::from("m1")).expect("stored");
        assert!(stored.is_deleted);
        assert_eq!(stored.deleted_by.as_deref(), Some("u1"));
    }

    #[test]
    fn deletion_after_local_tombstone_confirms_without_changes() {
        let mut store = store_with_active_conversation();
        store.append_incoming(message("m1", "hi"));
        store.mark_deleted_locally(&MessageId::from("m1"), "u1");
        assert!(!store.reconcile_deletion(&MessageId::from("m1"), Some("u1".to_string())));
    }

    #[test]
    fn reaction_update_replaces_authoritative_fields_only() {
        let mut store = store_with_active_conversation();
        let mut original = message("m1", "hi");
        original.reply_snapshot = Some(ReplySnapshot {
            id: MessageId::from("m0"),
            sender: "u2".to_string(),
            body: MessageBody::Text("earlier".to_string()),
        });
        store.append_incoming(original);

        let mut update = message("m1", "hi");
        update.liked_by = BTreeSet::from(["Pat Lee".to_string()]);
        store.reconcile_update(update).expect("known id");

        let stored = store.get(&MessageId::from("m1")).expect("stored");
        assert!(stored.liked_by.contains("Pat Lee"));
        assert!(stored.reply_snapshot.is_some());
    }

    #[test]
    fn deleting_original_leaves_reply_snapshot_untouched() {
        let mut store = store_with_active_conversation();
        store.append_incoming(message("m1", "original"));
        let snapshot = store
            .get(&MessageId::from("m1"))
            .and_then(Message::snapshot)
            .expect("snapshot");
        let mut reply = message("m2", "reply");
        reply.reply_snapshot = Some(snapshot);
        store.append_incoming(reply);

        store.reconcile_deletion(&MessageId::from("m1"), Some("u1".to_string()));

        let stored_reply = store.get(&MessageId::from("m2")).expect("stored");
        let snapshot = stored_reply.reply_snapshot.as_ref().expect("snapshot kept");
        assert_eq!(snapshot.body, MessageBody::Text("original".to_string()));
    }
}
