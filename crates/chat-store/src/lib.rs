//! File-backed [`SessionStore`].
//!
//! Layout under the store root:
//!
//! ```text
//! sessions/<session_id>/session.json
//! sessions/<session_id>/messages.jsonl
//! files/<file_id>.json
//! files/<file_id>.bin
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chat_protocol::{
    ChatError, ChatResult, FileId, FileRecord, MessageId, MessageRecord, MessageRole, NewFile,
    NewMessage, SessionId, SessionRecord, SessionStore,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, instrument, warn};

#[derive(Debug)]
pub struct FileSessionStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw bytes of a stored upload.
    pub async fn read_file_data(&self, file_id: &FileId) -> ChatResult<Vec<u8>> {
        let path = self
            .file_blob_path(file_id)
            .ok_or_else(|| ChatError::FileNotFound(file_id.to_string()))?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ChatError::FileNotFound(file_id.to_string()));
        }
        Ok(fs::read(&path).await?)
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    /// `None` for ids that cannot be used as a single path component.
    fn session_dir(&self, session_id: &SessionId) -> Option<PathBuf> {
        safe_component(session_id.as_str()).then(|| self.sessions_dir().join(session_id.as_str()))
    }

    fn session_path(&self, session_id: &SessionId) -> Option<PathBuf> {
        self.session_dir(session_id)
            .map(|dir| dir.join("session.json"))
    }

    fn messages_path(&self, session_id: &SessionId) -> Option<PathBuf> {
        self.session_dir(session_id)
            .map(|dir| dir.join("messages.jsonl"))
    }

    fn file_record_path(&self, file_id: &FileId) -> Option<PathBuf> {
        safe_component(file_id.as_str())
            .then(|| self.files_dir().join(format!("{}.json", file_id.as_str())))
    }

    fn file_blob_path(&self, file_id: &FileId) -> Option<PathBuf> {
        safe_component(file_id.as_str())
            .then(|| self.files_dir().join(format!("{}.bin", file_id.as_str())))
    }

    /// Entries nobody else holds are pruned on each call.
    fn lock_for(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard.retain(|_, lock| Arc::strong_count(lock) > 1);
        guard
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create store dir {parent:?}"))?;
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed reading {path:?}"))?;
        let value =
            serde_json::from_str(&raw).with_context(|| format!("failed parsing {path:?}"))?;
        Ok(Some(value))
    }

    /// Write through a sibling temp file so readers never see a torn document.
    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        Self::ensure_parent(path).await?;
        let payload = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .await
            .with_context(|| format!("failed writing {tmp:?}"))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed replacing {path:?}"))?;
        Ok(())
    }

    async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let item = serde_json::from_str(&line)
                .with_context(|| format!("failed parsing line in {path:?}"))?;
            out.push(item);
        }
        Ok(out)
    }

    async fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        Self::ensure_parent(path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed opening log {path:?}"))?;
        let line = serde_json::to_string(value).context("failed serializing record")?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        match self.session_path(session_id) {
            Some(path) => Self::read_json(&path).await,
            None => Ok(None),
        }
    }

    async fn require_session(&self, session_id: &SessionId) -> ChatResult<(SessionRecord, PathBuf)> {
        let path = self
            .session_path(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        let session = Self::read_json::<SessionRecord>(&path)
            .await
            .map_err(storage)?
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        Ok((session, path))
    }

    /// Attach uploaded files to the message that referenced them.
    async fn claim_files(&self, message: &MessageRecord) -> Result<()> {
        for file_id in &message.file_ids {
            let Some(path) = self.file_record_path(file_id) else {
                continue;
            };
            let Some(mut record) = Self::read_json::<FileRecord>(&path).await? else {
                warn!(%file_id, "message references unknown file");
                continue;
            };
            if record.session_id != message.session_id {
                warn!(%file_id, "message references a file from another session");
                continue;
            }
            record.message_id = Some(message.message_id.clone());
            Self::write_json(&path, &record).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    #[instrument(skip(self))]
    async fn create_session(&self, title: String) -> ChatResult<SessionRecord> {
        let session = SessionRecord::new(title);
        let path = self
            .session_path(&session.session_id)
            .ok_or_else(|| ChatError::Storage("generated session id is not path safe".into()))?;
        Self::write_json(&path, &session).await.map_err(storage)?;
        debug!(session_id = %session.session_id, "session created");
        Ok(session)
    }

    async fn get_session(&self, session_id: &SessionId) -> ChatResult<Option<SessionRecord>> {
        self.load_session(session_id).await.map_err(storage)
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self, limit: usize) -> ChatResult<Vec<SessionRecord>> {
        let dir = self.sessions_dir();
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir).await?;
        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join("session.json");
            match Self::read_json::<SessionRecord>(&path).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(error) => warn!(?path, error = %error, "skipping unreadable session"),
            }
        }
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions.truncate(limit);
        debug!(count = sessions.len(), "sessions listed");
        Ok(sessions)
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn touch_session(&self, session_id: &SessionId) -> ChatResult<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let (mut session, path) = self.require_session(session_id).await?;
        session.last_activity_at = Utc::now();
        Self::write_json(&path, &session).await.map_err(storage)
    }

    #[instrument(skip(self, message), fields(session_id = %message.session_id, role = ?message.role))]
    async fn append_message(&self, message: NewMessage) -> ChatResult<MessageRecord> {
        let lock = self.lock_for(&message.session_id);
        let _guard = lock.lock().await;
        let (mut session, session_path) = self.require_session(&message.session_id).await?;

        let record = MessageRecord {
            message_id: MessageId::new_uuid(),
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            file_ids: message.file_ids,
            created_at: Utc::now(),
        };
        let messages_path = self
            .messages_path(&record.session_id)
            .ok_or_else(|| ChatError::SessionNotFound(record.session_id.to_string()))?;
        Self::append_jsonl(&messages_path, &record)
            .await
            .map_err(storage)?;

        if record.role == MessageRole::User && !record.file_ids.is_empty() {
            self.claim_files(&record).await.map_err(storage)?;
        }

        session.last_activity_at = record.created_at;
        Self::write_json(&session_path, &session)
            .await
            .map_err(storage)?;
        debug!(message_id = %record.message_id, "message appended");
        Ok(record)
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn list_messages(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> ChatResult<Vec<MessageRecord>> {
        let Some(path) = self.messages_path(session_id) else {
            return Ok(Vec::new());
        };
        let mut messages: Vec<MessageRecord> = Self::read_jsonl(&path).await.map_err(storage)?;
        if let Some(limit) = limit
            && messages.len() > limit
        {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    async fn message_count(&self, session_id: &SessionId) -> ChatResult<usize> {
        Ok(self.list_messages(session_id, None).await?.len())
    }

    #[instrument(skip(self, file), fields(session_id = %file.session_id, filename = %file.filename, size = file.data.len()))]
    async fn create_file(&self, file: NewFile) -> ChatResult<FileRecord> {
        self.require_session(&file.session_id).await?;

        let file_id = FileId::new_uuid();
        let record = FileRecord {
            file_id: file_id.clone(),
            session_id: file.session_id,
            message_id: None,
            filename: file.filename,
            file_type: file.file_type,
            file_size: file.data.len() as u64,
            sha256: hex::encode(Sha256::digest(&file.data)),
            uploaded_at: Utc::now(),
        };
        let (Some(blob_path), Some(record_path)) =
            (self.file_blob_path(&file_id), self.file_record_path(&file_id))
        else {
            return Err(ChatError::Storage("generated file id is not path safe".into()));
        };

        Self::ensure_parent(&blob_path).await.map_err(storage)?;
        fs::write(&blob_path, &file.data).await?;
        Self::write_json(&record_path, &record)
            .await
            .map_err(storage)?;
        debug!(file_id = %record.file_id, sha256 = %record.sha256, "file stored");
        Ok(record)
    }

    async fn get_file(&self, file_id: &FileId) -> ChatResult<Option<FileRecord>> {
        match self.file_record_path(file_id) {
            Some(path) => Self::read_json(&path).await.map_err(storage),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn list_session_files(&self, session_id: &SessionId) -> ChatResult<Vec<FileRecord>> {
        let dir = self.files_dir();
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_json::<FileRecord>(&path).await.map_err(storage)?
                && &record.session_id == session_id
            {
                files.push(record);
            }
        }
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(files)
    }
}

fn storage(error: anyhow::Error) -> ChatError {
    ChatError::Storage(format!("{error:#}"))
}

fn safe_component(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
