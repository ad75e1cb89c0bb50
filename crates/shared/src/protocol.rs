use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationId, MessageId, Role, UserId};

/// Typed message payload. `image` and `file` carry an uploaded-file
/// descriptor, `location` a coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    Image(FileMeta),
    File(FileMeta),
    Location(GeoPoint),
}

impl MessageBody {
    /// Short label used for cross-conversation notices.
    pub fn kind_label(&self) -> &'static str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::Image(_) => "image",
            MessageBody::File(_) => "file",
            MessageBody::Location(_) => "location",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub url: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Point-in-time copy of the message being replied to. Immutable once
/// captured: later edits or deletion of the original do not touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub id: MessageId,
    pub sender: String,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned; absent while a locally composed draft is in
    /// flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_name: String,
    pub receiver_name: String,
    pub sender_role: Role,
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_snapshot: Option<ReplySnapshot>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub liked_by: BTreeSet<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
}

impl Message {
    /// Capture an immutable reply snapshot of this message. Only
    /// server-confirmed messages (with an id) can be reply targets.
    pub fn snapshot(&self) -> Option<ReplySnapshot> {
        Some(ReplySnapshot {
            id: self.id.clone()?,
            sender: self.sender_name.clone(),
            body: self.body.clone(),
        })
    }

    /// Body for rendering. Tombstoned messages expose no content, only
    /// the optional deleting actor.
    pub fn display_body(&self) -> Option<&MessageBody> {
        if self.is_deleted {
            None
        } else {
            Some(&self.body)
        }
    }
}

/// Commands the client emits on the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    UserConnected { user_id: UserId },
    SendMessage(Message),
    #[serde(rename_all = "camelCase")]
    LikeMessage {
        message_id: MessageId,
        user_id: UserId,
        user_name: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        message_id: MessageId,
        user_name: String,
    },
}

/// Authoritative broadcasts the server fans out to both participants,
/// including the echo of the sender's own `send_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    MessageUpdated(Message),
    #[serde(rename_all = "camelCase")]
    DeleteMessageNotification {
        message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deleted_by: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserStatusUpdate {
        user_id: UserId,
        is_online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_active: Option<DateTime<Utc>>,
    },
}

/// One stored file as returned by the portal's multipart upload
/// endpoint; consumed when building `image`/`file` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub original_type: String,
}

impl UploadedFile {
    pub fn is_image(&self) -> bool {
        self.original_type.starts_with("image/")
    }

    pub fn into_body(self) -> MessageBody {
        let is_image = self.is_image();
        let meta = FileMeta {
            url: self.file_url,
            name: self.file_name,
            size: self.file_size,
        };
        if is_image {
            MessageBody::Image(meta)
        } else {
            MessageBody::File(meta)
        }
    }
}
