//! Previous-generation flat envelopes.
//!
//! These shapes were deployed before the `{type, data, metadata}` envelope
//! and must keep decoding byte-for-byte. They carry no sequence and no
//! request correlation.

use crate::event::EventKind;
use crate::ids::ToolId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LegacyEvent {
    Thinking {
        content: String,
    },
    ToolCall {
        tool_id: ToolId,
        tool_name: String,
        #[serde(default)]
        tool_args: String,
    },
    ToolResult {
        tool_id: ToolId,
        status: String,
    },
    FinalAnswer {
        content: String,
    },
    DataframeData {
        data: LegacyDataFrame,
    },
    Done,
    Error {
        message: String,
    },
    /// Any tag this generation never defined.
    #[serde(other)]
    Unknown,
}

impl LegacyEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::FinalAnswer { .. } => "final_answer",
            Self::DataframeData { .. } => "dataframe_data",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// The current-protocol kind with the same effect on turn state.
    pub fn current_equivalent(&self) -> Option<EventKind> {
        match self {
            Self::Thinking { .. } => Some(EventKind::Thinking),
            Self::ToolCall { .. } => Some(EventKind::ToolCallStart),
            Self::ToolResult { .. } => Some(EventKind::ToolCallEnd),
            Self::FinalAnswer { .. } => Some(EventKind::Content),
            Self::DataframeData { .. } => Some(EventKind::Data),
            Self::Done => Some(EventKind::SessionEnd),
            Self::Error { .. } => Some(EventKind::Error),
            Self::Unknown => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Table payload of a legacy `dataframe_data` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyDataFrame {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataframe_name: Option<String>,
}

/// Status strings carried by legacy `tool_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyToolStatus {
    Completed,
    Failed,
}

impl LegacyToolStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
