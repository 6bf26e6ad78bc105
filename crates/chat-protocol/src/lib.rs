//! # chat-protocol: streaming chat contract
//!
//! Shared types for the event emitter (server) and the stream reducer
//! (client), plus the storage port both sides of the application use.
//!
//! It is intentionally dependency-light (no tokio or axum) so it can be used
//! as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`] - Typed ID wrappers (SessionId, RequestId, ToolId, ...)
//! - [`event`] - Current envelope: EventEnvelope, EventPayload, EventMetadata
//! - [`legacy`] - Previous-generation flat envelopes
//! - [`wire`] - `data: ` line framing and generation detection
//! - [`session`] - Session, message, and file records
//! - [`ports`] - SessionStore port
//! - [`error`] - ChatError, ChatResult

pub mod error;
pub mod event;
pub mod ids;
pub mod legacy;
pub mod ports;
pub mod session;
pub mod wire;

pub use error::{ChatError, ChatResult};
pub use event::{
    ContentData, ContentFormat, DataBlockData, DataType, ErrorData, ErrorType, EventEnvelope,
    EventKind, EventMetadata, EventPayload, SessionEndData, SessionStartData, SessionStatus,
    ThinkingData, ThinkingStage, ToolCallEndData, ToolCallProgressData, ToolCallStartData,
    ToolStatus,
};
pub use ids::{FileId, MessageId, RequestId, SessionId, ToolId};
pub use legacy::{LegacyDataFrame, LegacyEvent, LegacyToolStatus};
pub use ports::SessionStore;
pub use session::{
    AssistantMetadata, DEFAULT_SESSION_TITLE, DataBlockSummary, FileRecord, MessageRecord,
    MessageRole, NewFile, NewMessage, SessionRecord, ToolCallSummary,
};
pub use wire::{DATA_PREFIX, DecodedEvent, ProtocolGeneration, decode_value, encode_line, parse_line};
