use std::path::PathBuf;
use std::sync::Arc;

use chat_events::{EngineItem, EventMux, StreamEmitter};
use chat_protocol::{
    AssistantMetadata, DataBlockSummary, ErrorType, FileId, MessageRecord, NewMessage, RequestId,
    SessionId, SessionStatus, SessionStore, ToolCallSummary,
};
use chat_store::FileSessionStore;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::demo::DemoEngine;
use crate::engine::{EngineRequest, HistoryEntry, ReasoningEngine};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Prior messages handed to the engine.
    pub history_limit: usize,
    /// Capacity of the engine queue and of the outgoing line channel.
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub content: String,
    pub file_ids: Vec<FileId>,
}

/// How a turn task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    /// The client stopped reading before the turn finished.
    Cancelled,
}

/// Receiving end of one turn: serialized event lines plus the task producing
/// them. Dropping the lines receiver cancels the turn.
#[derive(Debug)]
pub struct TurnHandle {
    request_id: RequestId,
    lines: mpsc::Receiver<String>,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn into_stream(self) -> ReceiverStream<String> {
        ReceiverStream::new(self.lines)
    }

    pub fn into_parts(self) -> (ReceiverStream<String>, JoinHandle<TurnOutcome>) {
        (ReceiverStream::new(self.lines), self.task)
    }

    /// Read every line until the turn ends.
    pub async fn collect(mut self) -> (Vec<String>, TurnOutcome) {
        let mut lines = Vec::new();
        while let Some(line) = self.lines.recv().await {
            lines.push(line);
        }
        let outcome = self.task.await.unwrap_or(TurnOutcome::Failed);
        (lines, outcome)
    }
}

#[derive(Clone)]
pub struct ChatRuntime {
    config: RuntimeConfig,
    store: Arc<dyn SessionStore>,
    engine: Arc<dyn ReasoningEngine>,
}

impl ChatRuntime {
    pub fn new(
        config: RuntimeConfig,
        store: Arc<dyn SessionStore>,
        engine: Arc<dyn ReasoningEngine>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Spawn one assistant turn and return its line stream.
    pub fn start_turn(&self, request: ChatRequest) -> TurnHandle {
        let emitter = StreamEmitter::generate();
        let request_id = emitter.request_id().clone();
        let (tx, lines) = mpsc::channel(self.config.channel_capacity.max(1));
        let span = info_span!(
            "chat_turn",
            session_id = %request.session_id,
            request_id = %request_id,
        );
        let runtime = self.clone();
        let task = tokio::spawn(
            async move {
                match runtime.run_turn(request, emitter, &tx).await {
                    Ok(outcome) => outcome,
                    Err(Disconnected) => {
                        info!("client disconnected; turn cancelled");
                        TurnOutcome::Cancelled
                    }
                }
            }
            .instrument(span),
        );
        TurnHandle {
            request_id,
            lines,
            task,
        }
    }

    async fn run_turn(
        &self,
        request: ChatRequest,
        mut emitter: StreamEmitter,
        tx: &mpsc::Sender<String>,
    ) -> Result<TurnOutcome, Disconnected> {
        let ChatRequest {
            session_id,
            content,
            file_ids,
        } = request;

        match self.store.get_session(&session_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("chat requested for unknown session");
                push(tx, emitter.emit_error(ErrorType::Validation, "session not found", None, false))
                    .await?;
                push(tx, emitter.emit_session_end(SessionStatus::Error, None)).await?;
                return Ok(TurnOutcome::Failed);
            }
            Err(err) => return fail_system(tx, &mut emitter, "failed to load session", err.to_string()).await,
        }

        push(tx, emitter.emit_session_start(session_id.clone())).await?;

        let user_message = match self
            .store
            .append_message(NewMessage::user(session_id.clone(), content, file_ids.clone()))
            .await
        {
            Ok(message) => message,
            Err(err) => {
                return fail_system(tx, &mut emitter, "failed to save user message", err.to_string()).await;
            }
        };

        let engine_request = match self.build_request(&user_message, file_ids).await {
            Ok(engine_request) => engine_request,
            Err(err) => {
                return fail_system(tx, &mut emitter, "failed to load conversation", err.to_string()).await;
            }
        };
        info!(
            engine = self.engine.name(),
            history = engine_request.history.len(),
            files = engine_request.files.len(),
            "running engine"
        );

        let mux = EventMux::new(self.config.channel_capacity);
        let sinks = mux.sinks();
        let mut items = mux.into_receiver();
        let engine = Arc::clone(&self.engine);
        let mut engine_task = tokio::spawn(
            async move { engine.run(engine_request, sinks).await }.in_current_span(),
        );

        let mut turn = TurnSummary::default();
        loop {
            let item = tokio::select! {
                item = items.recv() => item,
                () = tx.closed() => {
                    engine_task.abort();
                    return Err(Disconnected);
                }
            };
            let Some(item) = item else { break };
            turn.observe(&item);
            if push(tx, emitter.emit_item(item)).await.is_err() {
                engine_task.abort();
                return Err(Disconnected);
            }
        }

        let engine_result = tokio::select! {
            joined = &mut engine_task => joined,
            () = tx.closed() => {
                engine_task.abort();
                return Err(Disconnected);
            }
        };
        match engine_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %format!("{err:#}"), "engine failed");
                push(
                    tx,
                    emitter.emit_error(
                        ErrorType::Execution,
                        format!("engine failed: {err}"),
                        Some(json!({ "exception": format!("{err:#}") })),
                        true,
                    ),
                )
                .await?;
                push(tx, emitter.emit_session_end(SessionStatus::Error, None)).await?;
                return Ok(TurnOutcome::Failed);
            }
            Err(join_error) => {
                return fail_system(tx, &mut emitter, "engine task aborted", join_error.to_string()).await;
            }
        }

        let summary = turn.summary();
        let (content, metadata) = turn.into_message_parts();
        if let Err(err) = self
            .store
            .append_message(NewMessage::assistant(session_id, content, metadata))
            .await
        {
            return fail_system(tx, &mut emitter, "failed to save assistant message", err.to_string()).await;
        }

        push(tx, emitter.emit_session_end(SessionStatus::Completed, Some(summary))).await?;
        debug!(events = emitter.events_emitted(), "turn completed");
        Ok(TurnOutcome::Completed)
    }

    async fn build_request(
        &self,
        user_message: &MessageRecord,
        file_ids: Vec<FileId>,
    ) -> chat_protocol::ChatResult<EngineRequest> {
        let messages = self
            .store
            .list_messages(&user_message.session_id, Some(self.config.history_limit + 1))
            .await?;
        let mut history: Vec<HistoryEntry> = messages
            .iter()
            .filter(|message| message.message_id != user_message.message_id)
            .map(HistoryEntry::from)
            .collect();
        if history.len() > self.config.history_limit {
            history.drain(..history.len() - self.config.history_limit);
        }

        let mut files = Vec::with_capacity(file_ids.len());
        for file_id in &file_ids {
            match self.store.get_file(file_id).await? {
                Some(file) => files.push(file),
                None => warn!(%file_id, "referenced file not found"),
            }
        }

        Ok(EngineRequest {
            session_id: user_message.session_id.clone(),
            input: user_message.content.clone(),
            history,
            files,
        })
    }
}

#[derive(Debug)]
struct Disconnected;

async fn push(tx: &mpsc::Sender<String>, line: String) -> Result<(), Disconnected> {
    tx.send(line).await.map_err(|_| Disconnected)
}

async fn fail_system(
    tx: &mpsc::Sender<String>,
    emitter: &mut StreamEmitter,
    message: &str,
    cause: String,
) -> Result<TurnOutcome, Disconnected> {
    error!(error = %cause, "{message}");
    push(
        tx,
        emitter.emit_error(
            ErrorType::System,
            format!("system error: {message}"),
            Some(json!({ "exception": cause })),
            false,
        ),
    )
    .await?;
    push(tx, emitter.emit_session_end(SessionStatus::Error, None)).await?;
    Ok(TurnOutcome::Failed)
}

/// What the turn produced, for persistence and the closing summary.
#[derive(Debug, Default)]
struct TurnSummary {
    content: String,
    tool_calls: Vec<ToolCallSummary>,
    data_blocks: Vec<DataBlockSummary>,
}

impl TurnSummary {
    fn observe(&mut self, item: &EngineItem) {
        match item {
            EngineItem::Content { content, .. } => self.content.push_str(content),
            EngineItem::ToolStart {
                tool_id,
                tool_name,
                description,
                ..
            } => self.tool_calls.push(ToolCallSummary {
                tool_id: tool_id.clone(),
                tool_name: tool_name.clone(),
                description: description.clone(),
            }),
            EngineItem::Data {
                data_type, data, ..
            } => self.data_blocks.push(DataBlockSummary {
                data_type: *data_type,
                name: data
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("untitled")
                    .to_owned(),
            }),
            _ => {}
        }
    }

    fn summary(&self) -> Value {
        json!({
            "tool_calls": self.tool_calls.len(),
            "data_blocks": self.data_blocks.len(),
            "content_length": self.content.chars().count(),
        })
    }

    fn into_message_parts(self) -> (String, Option<Value>) {
        let metadata = AssistantMetadata {
            tool_calls: self.tool_calls,
            data_blocks: self.data_blocks,
        };
        (self.content, metadata.into_value())
    }
}

/// Wires a [`ChatRuntime`] over a file-backed store.
#[derive(Clone)]
pub struct RuntimeBuilder {
    root: PathBuf,
    config: RuntimeConfig,
    store: Option<Arc<dyn SessionStore>>,
    engine: Option<Arc<dyn ReasoningEngine>>,
}

impl RuntimeBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: RuntimeConfig::default(),
            store: None,
            engine: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn history_limit(mut self, history_limit: usize) -> Self {
        self.config.history_limit = history_limit;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> ChatRuntime {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileSessionStore::new(self.root)));
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(DemoEngine::new()));
        ChatRuntime::new(self.config, store, engine)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use chat_protocol::{ContentFormat, DataType, MessageRole, ToolId, ToolStatus};
    use chat_reducer::{ToolCallStatus, TurnReducer, TurnState};
    use futures_util::StreamExt;
    use tokio::fs;

    use super::*;
    use crate::demo::ScriptedEngine;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn fold(lines: &[String]) -> TurnState {
        let mut reducer = TurnReducer::started();
        for line in lines {
            reducer.apply_line(line.trim_end());
        }
        reducer.into_state()
    }

    fn script() -> Vec<EngineItem> {
        let tool_id = ToolId::from_string("tool_fixed01");
        vec![
            EngineItem::Thinking {
                content: "Checking. ".into(),
                stage: None,
            },
            EngineItem::ToolStart {
                tool_id: tool_id.clone(),
                tool_name: "display_table".into(),
                description: "Display table: Sales".into(),
                arguments: None,
            },
            EngineItem::Data {
                data_type: DataType::Dataframe,
                data: json!({"name": "Sales", "columns": ["a"], "rows": [[1]]}),
                metadata: None,
            },
            EngineItem::ToolEnd {
                tool_id,
                status: ToolStatus::Success,
                result: None,
                error: None,
                duration_ms: Some(2),
            },
            EngineItem::Content {
                content: "Here ".into(),
                format: ContentFormat::Markdown,
                is_complete: false,
            },
            EngineItem::Content {
                content: "it is.".into(),
                format: ContentFormat::Markdown,
                is_complete: false,
            },
        ]
    }

    fn runtime(root: &Path, engine: Arc<dyn ReasoningEngine>) -> ChatRuntime {
        RuntimeBuilder::new(root).engine(engine).build()
    }

    #[tokio::test]
    async fn completed_turn_streams_and_persists() -> Result<()> {
        let root = unique_test_root("chat-runtime-complete");
        let runtime = runtime(&root, Arc::new(ScriptedEngine::new(script())));
        let session = runtime.store().create_session("t".into()).await?;

        let handle = runtime.start_turn(ChatRequest {
            session_id: session.session_id.clone(),
            content: "show sales".into(),
            file_ids: Vec::new(),
        });
        let request_id = handle.request_id().clone();
        let (lines, outcome) = handle.collect().await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert!(lines.iter().all(|line| line.starts_with("data: ") && line.ends_with("\n\n")));

        let state = fold(&lines);
        assert_eq!(state.request_id, Some(request_id));
        assert_eq!(state.session_id, Some(session.session_id.clone()));
        assert_eq!(state.thinking_text, "Checking. ");
        assert_eq!(state.main_text, "Here it is.");
        assert_eq!(state.data_blocks.len(), 1);
        assert_eq!(
            state.tool_calls[&ToolId::from_string("tool_fixed01")].status,
            ToolCallStatus::Completed
        );
        assert_eq!(state.session_status, Some(SessionStatus::Completed));
        assert_eq!(
            state.summary,
            Some(json!({"tool_calls": 1, "data_blocks": 1, "content_length": 11}))
        );
        assert_eq!(state.last_sequence, Some(lines.len() as u64 - 1));

        let messages = runtime.store().list_messages(&session.session_id, None).await?;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "Here it is.");
        let metadata = messages[1].metadata.as_ref().unwrap();
        assert_eq!(metadata["data_blocks"][0]["name"], "Sales");
        assert_eq!(metadata["tool_calls"][0]["tool_id"], "tool_fixed01");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_yields_validation_error_then_end() -> Result<()> {
        let root = unique_test_root("chat-runtime-unknown");
        let runtime = runtime(&root, Arc::new(ScriptedEngine::new(script())));

        let (lines, outcome) = runtime
            .start_turn(ChatRequest {
                session_id: SessionId::from_string("missing"),
                content: "hi".into(),
                file_ids: Vec::new(),
            })
            .collect()
            .await;
        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"error\""));
        assert!(lines[0].contains("\"error_type\":\"validation\""));
        assert!(lines[1].contains("\"type\":\"session_end\""));

        let state = fold(&lines);
        assert!(state.has_error);
        assert!(!state.recoverable);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn engine_failure_is_recoverable_and_not_persisted() -> Result<()> {
        let root = unique_test_root("chat-runtime-failure");
        let engine = ScriptedEngine::new(script()).failing_with("model unavailable");
        let runtime = runtime(&root, Arc::new(engine));
        let session = runtime.store().create_session("t".into()).await?;

        let (lines, outcome) = runtime
            .start_turn(ChatRequest {
                session_id: session.session_id.clone(),
                content: "hi".into(),
                file_ids: Vec::new(),
            })
            .collect()
            .await;
        assert_eq!(outcome, TurnOutcome::Failed);
        let last_two = &lines[lines.len() - 2..];
        assert!(last_two[0].contains("\"error_type\":\"execution\""));
        assert!(last_two[1].contains("\"status\":\"error\""));

        let state = fold(&lines);
        assert!(state.has_error && state.recoverable);
        assert_eq!(state.error_message.as_deref(), Some("engine failed: model unavailable"));
        assert_eq!(state.main_text, "Here it is.");

        let messages = runtime.store().list_messages(&session.session_id, None).await?;
        assert_eq!(messages.len(), 1, "only the user message is stored");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_turn() -> Result<()> {
        let root = unique_test_root("chat-runtime-cancel");
        let engine = ScriptedEngine::new(script()).holding_for(Duration::from_secs(30));
        let runtime = runtime(&root, Arc::new(engine));
        let session = runtime.store().create_session("t".into()).await?;

        let (mut stream, task) = runtime
            .start_turn(ChatRequest {
                session_id: session.session_id.clone(),
                content: "hi".into(),
                file_ids: Vec::new(),
            })
            .into_parts();
        let first = stream.next().await.unwrap_or_default();
        assert!(first.contains("session_start"));
        drop(stream);

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await??;
        assert_eq!(outcome, TurnOutcome::Cancelled);
        let messages = runtime.store().list_messages(&session.session_id, None).await?;
        assert_eq!(messages.len(), 1);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn history_excludes_current_input_and_respects_limit() -> Result<()> {
        let root = unique_test_root("chat-runtime-history");
        let runtime = RuntimeBuilder::new(&root).history_limit(2).build();
        let session = runtime.store().create_session("t".into()).await?;
        for index in 0..4 {
            runtime
                .store()
                .append_message(NewMessage::user(
                    session.session_id.clone(),
                    format!("old {index}"),
                    Vec::new(),
                ))
                .await?;
        }
        let current = runtime
            .store()
            .append_message(NewMessage::user(session.session_id.clone(), "now", Vec::new()))
            .await?;

        let request = runtime.build_request(&current, Vec::new()).await?;
        let contents: Vec<&str> = request.history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, ["old 2", "old 3"]);
        assert_eq!(request.input, "now");
        assert_eq!(runtime.engine_name(), "demo");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
