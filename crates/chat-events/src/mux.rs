//! Merging the engine's two logical sub-streams into one ordered channel.
//!
//! The reasoning engine produces text fragments (tokens) and tool lifecycle
//! notifications concurrently. Both feed the same bounded FIFO; a single
//! consumer drains it and assigns sequence numbers, so the counter is never
//! shared. Items from one source keep their relative order; interleaving
//! across sources is whatever arrival order the queue observes.

use anyhow::{Result, anyhow};
use chat_protocol::{ContentFormat, DataType, ThinkingStage, ToolId, ToolStatus};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::emitter::StreamEmitter;

/// One notification from the engine, before sequencing.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineItem {
    Thinking {
        content: String,
        stage: Option<ThinkingStage>,
    },
    Content {
        content: String,
        format: ContentFormat,
        is_complete: bool,
    },
    ToolStart {
        tool_id: ToolId,
        tool_name: String,
        description: String,
        arguments: Option<Value>,
    },
    ToolProgress {
        tool_id: ToolId,
        progress: f64,
        message: String,
    },
    ToolEnd {
        tool_id: ToolId,
        status: ToolStatus,
        result: Option<Value>,
        error: Option<Value>,
        duration_ms: Option<u64>,
    },
    Data {
        data_type: DataType,
        data: Value,
        metadata: Option<Value>,
    },
}

impl StreamEmitter {
    /// Sequence and serialize one engine item.
    pub fn emit_item(&mut self, item: EngineItem) -> String {
        match item {
            EngineItem::Thinking { content, stage } => self.emit_thinking(content, stage),
            EngineItem::Content {
                content,
                format,
                is_complete,
            } => self.emit_content(content, format, is_complete),
            EngineItem::ToolStart {
                tool_id,
                tool_name,
                description,
                arguments,
            } => self.emit_tool_call_start(tool_id, tool_name, description, arguments),
            EngineItem::ToolProgress {
                tool_id,
                progress,
                message,
            } => self.emit_tool_call_progress(tool_id, progress, message),
            EngineItem::ToolEnd {
                tool_id,
                status,
                result,
                error,
                duration_ms,
            } => self.emit_tool_call_end(tool_id, status, result, error, duration_ms),
            EngineItem::Data {
                data_type,
                data,
                metadata,
            } => self.emit_data(data_type, data, metadata),
        }
    }
}

/// Shared FIFO behind the two sinks.
#[derive(Debug)]
pub struct EventMux {
    tx: mpsc::Sender<EngineItem>,
    rx: mpsc::Receiver<EngineItem>,
}

impl EventMux {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx }
    }

    pub fn sinks(&self) -> EngineSinks {
        EngineSinks {
            tokens: TokenSink {
                tx: self.tx.clone(),
            },
            tools: ToolSink {
                tx: self.tx.clone(),
            },
        }
    }

    /// Release the mux's own sender. The receiver closes once every sink
    /// handed out has been dropped.
    pub fn into_receiver(self) -> mpsc::Receiver<EngineItem> {
        self.rx
    }
}

/// The pair of producers handed to an engine run.
#[derive(Debug, Clone)]
pub struct EngineSinks {
    pub tokens: TokenSink,
    pub tools: ToolSink,
}

async fn forward(tx: &mpsc::Sender<EngineItem>, item: EngineItem) -> Result<()> {
    tx.send(item)
        .await
        .map_err(|_| anyhow!("turn stream closed"))
}

/// Producer for reasoning and answer fragments.
#[derive(Debug, Clone)]
pub struct TokenSink {
    tx: mpsc::Sender<EngineItem>,
}

impl TokenSink {
    pub async fn thinking(
        &self,
        content: impl Into<String>,
        stage: Option<ThinkingStage>,
    ) -> Result<()> {
        forward(
            &self.tx,
            EngineItem::Thinking {
                content: content.into(),
                stage,
            },
        )
        .await
    }

    pub async fn content(&self, content: impl Into<String>, is_complete: bool) -> Result<()> {
        forward(
            &self.tx,
            EngineItem::Content {
                content: content.into(),
                format: ContentFormat::Markdown,
                is_complete,
            },
        )
        .await
    }

    pub async fn send(&self, item: EngineItem) -> Result<()> {
        forward(&self.tx, item).await
    }
}

/// Producer for tool lifecycle notifications and the data they publish.
#[derive(Debug, Clone)]
pub struct ToolSink {
    tx: mpsc::Sender<EngineItem>,
}

impl ToolSink {
    pub async fn start(
        &self,
        tool_id: ToolId,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        arguments: Option<Value>,
    ) -> Result<()> {
        forward(
            &self.tx,
            EngineItem::ToolStart {
                tool_id,
                tool_name: tool_name.into(),
                description: description.into(),
                arguments,
            },
        )
        .await
    }

    pub async fn progress(
        &self,
        tool_id: ToolId,
        progress: f64,
        message: impl Into<String>,
    ) -> Result<()> {
        forward(
            &self.tx,
            EngineItem::ToolProgress {
                tool_id,
                progress,
                message: message.into(),
            },
        )
        .await
    }

    pub async fn end(
        &self,
        tool_id: ToolId,
        status: ToolStatus,
        result: Option<Value>,
        error: Option<Value>,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        forward(
            &self.tx,
            EngineItem::ToolEnd {
                tool_id,
                status,
                result,
                error,
                duration_ms,
            },
        )
        .await
    }

    pub async fn data(
        &self,
        data_type: DataType,
        data: Value,
        metadata: Option<Value>,
    ) -> Result<()> {
        forward(
            &self.tx,
            EngineItem::Data {
                data_type,
                data,
                metadata,
            },
        )
        .await
    }

    pub async fn send(&self, item: EngineItem) -> Result<()> {
        forward(&self.tx, item).await
    }
}
