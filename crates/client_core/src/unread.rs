/// Scroll offsets closer to the bottom than this count as "at
/// bottom".
pub const BOTTOM_PROXIMITY_THRESHOLD_PX: f64 = 50.0;

/// What the shell should do with a freshly appended message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// Viewport is pinned to the latest message; follow it down.
    StickToBottom,
    /// Reader is up in history; badge the message instead of yanking
    /// the viewport.
    Badge,
}

/// Two-state machine (at bottom / scrolled up) deciding whether an
/// arriving message counts as seen. The unread counter only grows
/// while scrolled up and drops to zero the instant the viewport
/// reaches the bottom or the conversation switches.
#[derive(Debug)]
pub struct UnreadTracker {
    at_bottom: bool,
    unread_count: u32,
}

impl Default for UnreadTracker {
    fn default() -> Self {
        // a freshly opened conversation starts scrolled to the latest
        Self {
            at_bottom: true,
            unread_count: 0,
        }
    }
}

impl UnreadTracker {
    pub fn at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    /// Viewport geometry changed. Returns the new at-bottom state.
    pub fn on_scroll(&mut self, distance_from_bottom: f64) -> bool {
        self.at_bottom = distance_from_bottom <= BOTTOM_PROXIMITY_THRESHOLD_PX;
        if self.at_bottom {
            self.unread_count = 0;
        }
        self.at_bottom
    }

    /// A message arrived for the active conversation.
    pub fn on_incoming(&mut self) -> ScrollAction {
        if self.at_bottom {
            ScrollAction::StickToBottom
        } else {
            self.unread_count += 1;
            ScrollAction::Badge
        }
    }

    /// The active conversation changed; the new one opens at the
    /// latest message with nothing unread.
    pub fn on_conversation_switch(&mut self) {
        self.at_bottom = true;
        self.unread_count = 0;
    }
}
