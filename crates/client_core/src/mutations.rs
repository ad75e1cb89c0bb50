use std::collections::HashSet;

use shared::domain::MessageId;
use shared::protocol::ReplySnapshot;

/// At most one pending reply target, captured as an immutable
/// snapshot at compose time and cleared on send or explicit cancel.
#[derive(Debug, Default)]
pub struct ReplyContext {
    pending: Option<ReplySnapshot>,
}

impl ReplyContext {
    pub fn begin(&mut self, snapshot: ReplySnapshot) {
        self.pending = Some(snapshot);
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Consumes the pending target for attachment to an outgoing
    /// draft.
    pub fn take(&mut self) -> Option<ReplySnapshot> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&ReplySnapshot> {
        self.pending.as_ref()
    }
}

/// Server-first reaction lifecycle: the like command is issued without
/// flipping anything locally, and the pending entry is cleared when
/// the authoritative `message_updated` broadcast lands. Duplicate
/// toggles while one is in flight are suppressed.
#[derive(Debug, Default)]
pub struct ReactionLedger {
    pending: HashSet<MessageId>,
}

impl ReactionLedger {
    /// Records an in-flight toggle. Returns false when one is already
    /// awaiting confirmation for this message.
    pub fn begin(&mut self, id: MessageId) -> bool {
        self.pending.insert(id)
    }

    pub fn confirm(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id)
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.contains(id)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Optimistic-first deletion lifecycle: the tombstone is applied
/// before the round trip and the pending entry is cleared by the
/// `delete_message_notification` broadcast.
#[derive(Debug, Default)]
pub struct DeletionLedger {
    pending: HashSet<MessageId>,
}

impl DeletionLedger {
    pub fn begin(&mut self, id: MessageId) -> bool {
        self.pending.insert(id)
    }

    pub fn confirm(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id)
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.contains(id)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use shared::protocol::MessageBody;

    use super::*;

    fn snapshot(id: &str) -> ReplySnapshot {
        ReplySnapshot {
            id: MessageId::from(id),
            sender: "Pat Lee".to_string(),
            body: MessageBody::Text("earlier".to_string()),
        }
    }

    #[test]
    fn reply_context_holds_at_most_one_target() {
        let mut context = ReplyContext::default();
        context.begin(snapshot("m1"));
        context.begin(snapshot("m2"));
        assert_eq!(
            context.pending().map(|snapshot| snapshot.id.clone()),
            Some(MessageId::from("m2"))
        );
        assert!(context.take().is_some());
        assert!(context.pending().is_none());
    }

    #[test]
    fn cancel_clears_pending_reply() {
        let mut context = ReplyContext::default();
        context.begin(snapshot("m1"));
        context.cancel();
        assert!(context.take().is_none());
    }

    #[test]
    fn duplicate_like_while_in_flight_is_suppressed() {
        let mut ledger = ReactionLedger::default();
        assert!(ledger.begin(MessageId::from("m1")));
        assert!(!ledger.begin(MessageId::from("m1")));
        assert!(ledger.confirm(&MessageId::from("m1")));
        assert!(ledger.begin(MessageId::from("m1")));
    }

    #[test]
    fn deletion_confirmation_is_idempotent() {
        let mut ledger = DeletionLedger::default();
        ledger.begin(MessageId::from("m1"));
        assert!(ledger.confirm(&MessageId::from("m1")));
        assert!(!ledger.confirm(&MessageId::from("m1")));
    }
}
