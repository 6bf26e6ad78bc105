//! The reasoning engine port.
//!
//! An engine is an opaque async producer: it writes reasoning and answer
//! fragments to the token sink and tool lifecycle notifications to the tool
//! sink, concurrently if it likes. Returning `Err` fails the turn.

use async_trait::async_trait;
use chat_events::EngineSinks;
use chat_protocol::{FileRecord, MessageRecord, MessageRole, SessionId};
use serde::Serialize;

/// One prior exchange handed to the engine as context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

impl From<&MessageRecord> for HistoryEntry {
    fn from(message: &MessageRecord) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub session_id: SessionId,
    pub input: String,
    /// Oldest first, excluding `input` itself.
    pub history: Vec<HistoryEntry>,
    pub files: Vec<FileRecord>,
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, request: EngineRequest, sinks: EngineSinks) -> anyhow::Result<()>;
}
