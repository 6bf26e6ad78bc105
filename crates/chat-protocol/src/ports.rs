//! Storage port consumed by the turn runtime and the HTTP layer.
//!
//! Object-safety note: the trait uses `async-trait` for async dyn-dispatch.

use crate::error::ChatResult;
use crate::ids::{FileId, SessionId};
use crate::session::{FileRecord, MessageRecord, NewFile, NewMessage, SessionRecord};
use async_trait::async_trait;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, title: String) -> ChatResult<SessionRecord>;
    async fn get_session(&self, session_id: &SessionId) -> ChatResult<Option<SessionRecord>>;
    /// Most recently active first.
    async fn list_sessions(&self, limit: usize) -> ChatResult<Vec<SessionRecord>>;
    async fn touch_session(&self, session_id: &SessionId) -> ChatResult<()>;

    /// Appends and bumps the session's activity time. User messages claim the
    /// listed files.
    async fn append_message(&self, message: NewMessage) -> ChatResult<MessageRecord>;
    /// Oldest first. With a limit, the most recent `limit` messages.
    async fn list_messages(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> ChatResult<Vec<MessageRecord>>;
    async fn message_count(&self, session_id: &SessionId) -> ChatResult<usize>;

    async fn create_file(&self, file: NewFile) -> ChatResult<FileRecord>;
    async fn get_file(&self, file_id: &FileId) -> ChatResult<Option<FileRecord>>;
    /// Newest first.
    async fn list_session_files(&self, session_id: &SessionId) -> ChatResult<Vec<FileRecord>>;
}
