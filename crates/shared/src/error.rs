use thiserror::Error;

use crate::domain::ConversationId;

/// Failure taxonomy for the synchronization engine.
///
/// Transport drops recover through the session's reconnect loop;
/// collaborator failures are converted to transient user notices at
/// the call site and never reach store invariants.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("history fetch failed for conversation {conversation_id}: {reason}")]
    HistoryFetch {
        conversation_id: ConversationId,
        reason: String,
    },
    #[error("upload failed for '{file_name}': {reason}")]
    Upload { file_name: String, reason: String },
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}
