//! Accumulated state of one assistant turn.

use chat_protocol::{DataType, ErrorType, LegacyDataFrame, RequestId, SessionId, SessionStatus, ToolId};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Streaming,
    Sealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Calling,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_id: ToolId,
    pub tool_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    /// Argument string as carried by the legacy `tool_call` shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
}

impl ToolCallRecord {
    pub(crate) fn calling(tool_id: ToolId, tool_name: String, description: String) -> Self {
        Self {
            tool_id,
            tool_name,
            description,
            arguments: None,
            raw_arguments: None,
            status: ToolCallStatus::Calling,
            result: None,
            error: None,
            duration_ms: None,
            progress: None,
            progress_message: None,
        }
    }

    pub fn is_calling(&self) -> bool {
        self.status == ToolCallStatus::Calling
    }
}

/// One structured block from a current-protocol `data` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBlock {
    pub data_type: DataType,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub sequence: u64,
}

/// Everything the UI needs to render one in-flight assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnState {
    pub phase: TurnPhase,
    pub streaming: bool,

    pub thinking_text: String,
    pub main_text: String,
    /// Answer text delivered through legacy `final_answer`.
    pub final_answer: String,

    pub tool_calls: IndexMap<ToolId, ToolCallRecord>,
    pub data_blocks: Vec<DataBlock>,
    /// Legacy `dataframe_data` keeps only the most recent table.
    pub latest_dataframe: Option<LegacyDataFrame>,

    pub has_error: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorType>,
    pub recoverable: bool,

    pub request_id: Option<RequestId>,
    pub session_id: Option<SessionId>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub session_status: Option<SessionStatus>,
    pub summary: Option<Value>,

    pub last_sequence: Option<u64>,
    pub event_count: u64,
}

impl TurnState {
    /// Answer text as rendered, regardless of which generation delivered it.
    pub fn display_text(&self) -> String {
        let mut text = String::with_capacity(self.main_text.len() + self.final_answer.len());
        text.push_str(&self.main_text);
        text.push_str(&self.final_answer);
        text
    }

    /// Tool calls in the order they were first announced.
    pub fn tool_calls_ordered(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.tool_calls.values()
    }

    pub fn is_sealed(&self) -> bool {
        self.phase == TurnPhase::Sealed
    }

    pub fn duration_ms(&self) -> Option<u64> {
        Some(self.end_time?.saturating_sub(self.start_time?))
    }
}
