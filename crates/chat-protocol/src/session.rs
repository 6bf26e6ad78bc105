//! Session, message, and file records.

use crate::event::DataType;
use crate::ids::{FileId, MessageId, SessionId, ToolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SESSION_TITLE: &str = "New chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new_uuid(),
            title: title.into(),
            created_at: now,
            last_activity_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<FileId>,
    pub created_at: DateTime<Utc>,
}

/// A message to be appended to a session.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<Value>,
    pub file_ids: Vec<FileId>,
}

impl NewMessage {
    pub fn user(session_id: SessionId, content: impl Into<String>, file_ids: Vec<FileId>) -> Self {
        Self {
            session_id,
            role: MessageRole::User,
            content: content.into(),
            metadata: None,
            file_ids,
        }
    }

    pub fn assistant(
        session_id: SessionId,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            session_id,
            role: MessageRole::Assistant,
            content: content.into(),
            metadata,
            file_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    /// Hex SHA-256 of the stored payload.
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

/// An uploaded payload to be stored.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub session_id: SessionId,
    pub filename: String,
    pub file_type: String,
    pub data: Vec<u8>,
}

/// Tool call as recorded on a persisted assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub tool_id: ToolId,
    pub tool_name: String,
    pub description: String,
}

/// Structured block as recorded on a persisted assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlockSummary {
    pub data_type: DataType,
    pub name: String,
}

/// Metadata attached to an assistant message once its turn completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_blocks: Vec<DataBlockSummary>,
}

impl AssistantMetadata {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.data_blocks.is_empty()
    }

    /// `None` when nothing was recorded, matching how messages are stored.
    pub fn into_value(self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        serde_json::to_value(self).ok()
    }
}
