use std::time::Instant;

use chat_protocol::{
    ContentData, ContentFormat, DataBlockData, DataType, ErrorData, ErrorType, EventEnvelope,
    EventMetadata, EventPayload, RequestId, SessionEndData, SessionId, SessionStartData,
    SessionStatus, ThinkingData, ThinkingStage, ToolCallEndData, ToolCallProgressData,
    ToolCallStartData, ToolId, ToolStatus, encode_line,
};
use serde_json::{Value, json};
use tracing::{debug, error, info};

/// Producer clock in milliseconds since UNIX epoch.
pub type Clock = fn() -> u64;

/// Turns one assistant turn into an ordered sequence of envelopes.
///
/// Sequence numbers start at 0 and advance by exactly one per emitted event.
/// The counter is owned by this value, so one emitter serves one request.
#[derive(Debug)]
pub struct StreamEmitter {
    request_id: RequestId,
    next_sequence: u64,
    last_timestamp: u64,
    started: Instant,
    clock: Clock,
}

impl StreamEmitter {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            next_sequence: 0,
            last_timestamp: 0,
            started: Instant::now(),
            clock: EventEnvelope::now_millis,
        }
    }

    /// Emitter with a freshly generated `req_…` id.
    pub fn generate() -> Self {
        Self::new(RequestId::generate())
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Number of events emitted so far (also the next sequence number).
    pub fn events_emitted(&self) -> u64 {
        self.next_sequence
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Wrap a payload with the next sequence number and a timestamp that never
    /// goes backwards, even if the wall clock does.
    pub fn envelope(&mut self, payload: EventPayload, duration_ms: Option<u64>) -> EventEnvelope {
        let timestamp = (self.clock)().max(self.last_timestamp);
        self.last_timestamp = timestamp;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        EventEnvelope {
            payload,
            metadata: EventMetadata {
                request_id: self.request_id.clone(),
                timestamp,
                sequence,
                duration_ms,
            },
        }
    }

    fn emit(&mut self, payload: EventPayload, duration_ms: Option<u64>) -> String {
        let envelope = self.envelope(payload, duration_ms);
        debug!(
            request_id = %self.request_id,
            sequence = envelope.metadata.sequence,
            event_kind = envelope.payload.type_name(),
            "event emitted"
        );
        encode_line(&envelope)
    }

    pub fn emit_session_start(&mut self, session_id: SessionId) -> String {
        info!(session_id = %session_id, request_id = %self.request_id, "session start");
        self.emit(
            EventPayload::SessionStart(SessionStartData {
                session_id,
                request_id: self.request_id.clone(),
            }),
            None,
        )
    }

    pub fn emit_thinking(
        &mut self,
        content: impl Into<String>,
        stage: Option<ThinkingStage>,
    ) -> String {
        self.emit(
            EventPayload::Thinking(ThinkingData {
                content: content.into(),
                stage,
            }),
            None,
        )
    }

    pub fn emit_tool_call_start(
        &mut self,
        tool_id: ToolId,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        arguments: Option<Value>,
    ) -> String {
        let tool_name = tool_name.into();
        let description = description.into();
        info!(
            request_id = %self.request_id,
            tool_id = %tool_id,
            tool_name = %tool_name,
            description = %description,
            "tool call start"
        );
        self.emit(
            EventPayload::ToolCallStart(ToolCallStartData {
                tool_id,
                tool_name,
                description,
                arguments,
            }),
            None,
        )
    }

    pub fn emit_tool_call_progress(
        &mut self,
        tool_id: ToolId,
        progress: f64,
        message: impl Into<String>,
    ) -> String {
        self.emit(
            EventPayload::ToolCallProgress(ToolCallProgressData {
                tool_id,
                progress,
                message: message.into(),
            }),
            None,
        )
    }

    /// `duration_ms` travels in metadata, not in `data`.
    pub fn emit_tool_call_end(
        &mut self,
        tool_id: ToolId,
        status: ToolStatus,
        result: Option<Value>,
        error: Option<Value>,
        duration_ms: Option<u64>,
    ) -> String {
        info!(
            request_id = %self.request_id,
            tool_id = %tool_id,
            status = ?status,
            duration_ms,
            "tool call end"
        );
        self.emit(
            EventPayload::ToolCallEnd(ToolCallEndData {
                tool_id,
                status,
                result,
                error,
            }),
            duration_ms,
        )
    }

    pub fn emit_content(
        &mut self,
        content: impl Into<String>,
        format: ContentFormat,
        is_complete: bool,
    ) -> String {
        self.emit(
            EventPayload::Content(ContentData {
                content: content.into(),
                format,
                is_complete,
            }),
            None,
        )
    }

    pub fn emit_data(
        &mut self,
        data_type: DataType,
        data: Value,
        metadata: Option<Value>,
    ) -> String {
        let line = self.emit(
            EventPayload::Data(DataBlockData {
                data_type,
                data,
                metadata,
            }),
            None,
        );
        info!(
            request_id = %self.request_id,
            data_type = ?data_type,
            bytes = line.len(),
            "data block"
        );
        line
    }

    pub fn emit_error(
        &mut self,
        error_type: ErrorType,
        message: impl Into<String>,
        details: Option<Value>,
        recoverable: bool,
    ) -> String {
        let message = message.into();
        error!(
            request_id = %self.request_id,
            error_type = ?error_type,
            message = %message,
            recoverable,
            "error event"
        );
        self.emit(
            EventPayload::Error(ErrorData {
                error_type,
                message,
                details,
                recoverable,
            }),
            None,
        )
    }

    /// Without a caller summary, reports turn duration and the number of
    /// events emitted before this one.
    pub fn emit_session_end(&mut self, status: SessionStatus, summary: Option<Value>) -> String {
        let duration_ms = self.elapsed_ms();
        let total_events = self.next_sequence;
        let summary = summary.unwrap_or_else(|| {
            json!({
                "duration_ms": duration_ms,
                "total_events": total_events,
            })
        });
        info!(
            request_id = %self.request_id,
            status = ?status,
            duration_ms,
            events = total_events,
            "session end"
        );
        self.emit(
            EventPayload::SessionEnd(SessionEndData {
                status,
                summary: Some(summary),
            }),
            Some(duration_ms),
        )
    }
}
