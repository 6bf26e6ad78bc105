//! Current-protocol event taxonomy.
//!
//! Every event on the wire is an envelope
//! `{"type": <kind>, "data": {..}, "metadata": {..}}`; the kind decides the
//! shape of `data`.
//!
//! Forward-compatible: unknown `"type"` tags (and known tags whose `data`
//! does not match the expected shape) deserialize into
//! `EventPayload::Custom { event_type, data }` instead of failing.
//! Enumerated fields fall back to an `Unknown` variant, and `error` /
//! `session_end` always decode into their typed payload so a terminal event
//! seals the turn no matter what its `data` looks like.

use crate::ids::{RequestId, SessionId, ToolId};
use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag of a current-protocol envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    Thinking,
    ToolCallStart,
    ToolCallProgress,
    ToolCallEnd,
    Content,
    Data,
    Error,
    SessionEnd,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::SessionStart,
        EventKind::Thinking,
        EventKind::ToolCallStart,
        EventKind::ToolCallProgress,
        EventKind::ToolCallEnd,
        EventKind::Content,
        EventKind::Data,
        EventKind::Error,
        EventKind::SessionEnd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::Thinking => "thinking",
            EventKind::ToolCallStart => "tool_call_start",
            EventKind::ToolCallProgress => "tool_call_progress",
            EventKind::ToolCallEnd => "tool_call_end",
            EventKind::Content => "content",
            EventKind::Data => "data",
            EventKind::Error => "error",
            EventKind::SessionEnd => "session_end",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Whether this kind seals a turn on the consumer side.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::SessionEnd | EventKind::Error)
    }
}

// ─── Enumerations carried in payloads ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStage {
    Reasoning,
    Planning,
    Analyzing,
    /// Any value this build does not recognize.
    #[serde(other)]
    Unknown,
}

/// Outcome reported by `tool_call_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    #[default]
    Markdown,
    Text,
    Html,
    /// Any value this build does not recognize.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Dataframe,
    Chart,
    Image,
    Custom,
    /// Any value this build does not recognize.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    Execution,
    Timeout,
    System,
    /// Any value this build does not recognize.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Error,
    Cancelled,
    /// Any value this build does not recognize.
    #[serde(other)]
    Unknown,
}

// ─── Payloads ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartData {
    pub session_id: SessionId,
    pub request_id: RequestId,
}

/// A reasoning delta. `content` is appended, never a cumulative snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingData {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ThinkingStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallStartData {
    pub tool_id: ToolId,
    pub tool_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallProgressData {
    pub tool_id: ToolId,
    /// Percentage in `0..=100`.
    pub progress: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEndData {
    pub tool_id: ToolId,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// An answer delta, same accumulation contract as [`ThinkingData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentData {
    pub content: String,
    #[serde(default)]
    pub format: ContentFormat,
    #[serde(default)]
    pub is_complete: bool,
}

/// A complete, self-contained structured block (never a delta).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlockData {
    pub data_type: DataType,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndData {
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

fn field<T: DeserializeOwned>(data: &Value, key: &str) -> Option<T> {
    data.get(key).and_then(|value| T::deserialize(value).ok())
}

impl ErrorData {
    /// Best-effort decode of a malformed `error` body.
    pub fn salvage(data: &Value) -> Self {
        Self {
            error_type: field(data, "error_type").unwrap_or(ErrorType::Unknown),
            message: field(data, "message").unwrap_or_else(|| "unknown error".to_owned()),
            details: data.get("details").cloned(),
            recoverable: field(data, "recoverable").unwrap_or(false),
        }
    }
}

impl SessionEndData {
    /// Best-effort decode of a malformed `session_end` body.
    pub fn salvage(data: &Value) -> Self {
        Self {
            status: field(data, "status").unwrap_or(SessionStatus::Unknown),
            summary: data.get("summary").cloned(),
        }
    }
}

/// Kind-specific payload of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SessionStart(SessionStartData),
    Thinking(ThinkingData),
    ToolCallStart(ToolCallStartData),
    ToolCallProgress(ToolCallProgressData),
    ToolCallEnd(ToolCallEndData),
    Content(ContentData),
    Data(DataBlockData),
    Error(ErrorData),
    SessionEnd(SessionEndData),
    /// Forward-compatible catch-all.
    Custom { event_type: String, data: Value },
}

impl EventPayload {
    /// `None` for [`EventPayload::Custom`].
    pub fn kind(&self) -> Option<EventKind> {
        Some(match self {
            Self::SessionStart(_) => EventKind::SessionStart,
            Self::Thinking(_) => EventKind::Thinking,
            Self::ToolCallStart(_) => EventKind::ToolCallStart,
            Self::ToolCallProgress(_) => EventKind::ToolCallProgress,
            Self::ToolCallEnd(_) => EventKind::ToolCallEnd,
            Self::Content(_) => EventKind::Content,
            Self::Data(_) => EventKind::Data,
            Self::Error(_) => EventKind::Error,
            Self::SessionEnd(_) => EventKind::SessionEnd,
            Self::Custom { .. } => return None,
        })
    }

    /// The `type` tag as written on the wire.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Custom { event_type, .. } => event_type,
            known => known.kind().map_or("custom", EventKind::as_str),
        }
    }

    /// Rebuild a payload from its wire tag and raw `data`.
    pub fn from_parts(event_type: String, data: Value) -> Self {
        fn typed<T: DeserializeOwned>(
            data: &Value,
            wrap: fn(T) -> EventPayload,
        ) -> Option<EventPayload> {
            T::deserialize(data).ok().map(wrap)
        }

        let known = match EventKind::from_tag(&event_type) {
            Some(EventKind::SessionStart) => typed(&data, Self::SessionStart),
            Some(EventKind::Thinking) => typed(&data, Self::Thinking),
            Some(EventKind::ToolCallStart) => typed(&data, Self::ToolCallStart),
            Some(EventKind::ToolCallProgress) => typed(&data, Self::ToolCallProgress),
            Some(EventKind::ToolCallEnd) => typed(&data, Self::ToolCallEnd),
            Some(EventKind::Content) => typed(&data, Self::Content),
            Some(EventKind::Data) => typed(&data, Self::Data),
            Some(EventKind::Error) => {
                typed(&data, Self::Error).or_else(|| Some(Self::Error(ErrorData::salvage(&data))))
            }
            Some(EventKind::SessionEnd) => typed(&data, Self::SessionEnd)
                .or_else(|| Some(Self::SessionEnd(SessionEndData::salvage(&data)))),
            None => None,
        };
        known.unwrap_or(Self::Custom { event_type, data })
    }
}

/// Correlation and ordering data attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub request_id: RequestId,
    /// Milliseconds since UNIX epoch; non-decreasing within a turn.
    #[serde(deserialize_with = "lenient_millis")]
    pub timestamp: u64,
    /// Strictly increasing per `request_id`, starting at 0.
    pub sequence: u64,
    #[serde(
        default,
        deserialize_with = "lenient_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
}

/// Any JSON number. Fractions are truncated, negatives clamp to 0.
#[derive(Deserialize)]
#[serde(untagged)]
enum Millis {
    Whole(u64),
    Real(f64),
}

impl From<Millis> for u64 {
    fn from(value: Millis) -> Self {
        match value {
            Millis::Whole(millis) => millis,
            Millis::Real(millis) if millis.is_finite() && millis > 0.0 => millis as u64,
            Millis::Real(_) => 0,
        }
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Millis::deserialize(deserializer).map(u64::from)
}

fn lenient_millis_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Millis>::deserialize(deserializer)?.map(u64::from))
}

/// One complete current-protocol event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub payload: EventPayload,
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    pub fn kind(&self) -> Option<EventKind> {
        self.payload.kind()
    }

    pub fn request_id(&self) -> &RequestId {
        &self.metadata.request_id
    }

    pub fn sequence(&self) -> u64 {
        self.metadata.sequence
    }

    /// Current time in milliseconds since UNIX epoch.
    pub fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("EventEnvelope", 3)?;
        state.serialize_field("type", self.payload.type_name())?;
        match &self.payload {
            EventPayload::SessionStart(data) => state.serialize_field("data", data)?,
            EventPayload::Thinking(data) => state.serialize_field("data", data)?,
            EventPayload::ToolCallStart(data) => state.serialize_field("data", data)?,
            EventPayload::ToolCallProgress(data) => state.serialize_field("data", data)?,
            EventPayload::ToolCallEnd(data) => state.serialize_field("data", data)?,
            EventPayload::Content(data) => state.serialize_field("data", data)?,
            EventPayload::Data(data) => state.serialize_field("data", data)?,
            EventPayload::Error(data) => state.serialize_field("data", data)?,
            EventPayload::SessionEnd(data) => state.serialize_field("data", data)?,
            EventPayload::Custom { data, .. } => state.serialize_field("data", data)?,
        }
        state.serialize_field("metadata", &self.metadata)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
    metadata: EventMetadata,
}

/// Forward-compatible deserializer: unknown kinds become `Custom`.
impl<'de> Deserialize<'de> for EventEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawEnvelope::deserialize(deserializer)?;
        Ok(EventEnvelope {
            payload: EventPayload::from_parts(raw.event_type, raw.data),
            metadata: raw.metadata,
        })
    }
}
