use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::domain::{Participant, UserId};
use tracing::debug;

/// Online/offline + last-active state for every known contact.
/// Mutated only by presence events and roster loads.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    roster: HashMap<UserId, Participant>,
}

impl PresenceTracker {
    pub fn load_roster(&mut self, contacts: Vec<Participant>) {
        self.roster = contacts
            .into_iter()
            .map(|contact| (contact.id.clone(), contact))
            .collect();
    }

    pub fn contact(&self, id: &UserId) -> Option<&Participant> {
        self.roster.get(id)
    }

    /// Contacts in stable name order.
    pub fn contacts(&self) -> Vec<Participant> {
        let mut contacts: Vec<_> = self.roster.values().cloned().collect();
        contacts.sort_by(|a, b| a.name.cmp(&b.name));
        contacts
    }

    /// Applies a presence event. Idempotent: re-applying the same
    /// status reports no change. Events for users outside the roster
    /// are dropped.
    pub fn apply_status(
        &mut self,
        user_id: &UserId,
        is_online: bool,
        last_active: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(contact) = self.roster.get_mut(user_id) else {
            debug!("presence: status for unknown contact {user_id} dropped");
            return false;
        };
        let changed = contact.is_online != is_online
            || (last_active.is_some() && contact.last_active != last_active);
        contact.is_online = is_online;
        if last_active.is_some() {
            contact.last_active = last_active;
        }
        changed
    }

    pub fn clear(&mut self) {
        self.roster.clear();
    }
}
