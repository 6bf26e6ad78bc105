//! Dispatch and accumulation rules.
//!
//! A [`TurnReducer`] owns one [`TurnState`] and folds decoded events into it.
//! It never fails: malformed lines, unknown kinds, foreign request ids and
//! unmatched tool ids are absorbed and reported through [`ApplyOutcome`].

use std::fmt;

use chat_protocol::{
    DecodedEvent, EventEnvelope, EventPayload, LegacyEvent, LegacyToolStatus, SessionStatus,
    ToolId, ToolStatus, parse_line,
};
use tracing::{debug, trace};

use crate::state::{DataBlock, ToolCallRecord, ToolCallStatus, TurnPhase, TurnState};

/// What applying one event did to the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State was mutated; the turn is still open.
    Applied,
    /// The event was terminal and sealed the turn.
    Sealed,
    Ignored(IgnoreReason),
}

impl ApplyOutcome {
    pub fn is_ignored(self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not a `data: ` line, or not decodable as either generation.
    Malformed,
    UnknownKind,
    AfterSeal,
    /// Current-protocol event carrying a different `request_id`.
    ForeignRequest,
    /// Tool event for an id that was never started, or already finished.
    UnmatchedTool,
}

type CompletionCallback = Box<dyn FnMut(&TurnState) + Send>;

/// Folds one turn's event stream into a [`TurnState`].
#[derive(Default)]
pub struct TurnReducer {
    state: TurnState,
    on_complete: Option<CompletionCallback>,
}

impl fmt::Debug for TurnReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnReducer")
            .field("state", &self.state)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl TurnReducer {
    /// An idle reducer. The turn starts on [`TurnReducer::start`] or on the
    /// first event, whichever comes first.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reducer whose turn has already been initiated.
    pub fn started() -> Self {
        let mut reducer = Self::new();
        reducer.start();
        reducer
    }

    /// Move `idle → streaming`. No effect once streaming or sealed.
    pub fn start(&mut self) {
        if self.state.phase == TurnPhase::Idle {
            self.state.phase = TurnPhase::Streaming;
            self.state.streaming = true;
        }
    }

    /// Invoked exactly once, when the turn seals.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&TurnState) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn into_state(self) -> TurnState {
        self.state
    }

    pub fn is_sealed(&self) -> bool {
        self.state.is_sealed()
    }

    /// Decode and apply one complete line.
    pub fn apply_line(&mut self, line: &str) -> ApplyOutcome {
        match parse_line(line) {
            Some(event) => self.apply(event),
            None => {
                trace!(line_len = line.len(), "dropping non-event line");
                ApplyOutcome::Ignored(IgnoreReason::Malformed)
            }
        }
    }

    pub fn apply(&mut self, event: DecodedEvent) -> ApplyOutcome {
        match event {
            DecodedEvent::Current(envelope) => self.apply_envelope(envelope),
            DecodedEvent::Legacy(event) => self.apply_legacy(event),
        }
    }

    /// Apply a current-protocol envelope.
    pub fn apply_envelope(&mut self, envelope: EventEnvelope) -> ApplyOutcome {
        if self.is_sealed() {
            debug!(event_type = envelope.payload.type_name(), "event after seal ignored");
            return ApplyOutcome::Ignored(IgnoreReason::AfterSeal);
        }
        if envelope.kind().is_none() {
            debug!(event_type = envelope.payload.type_name(), "unknown event kind ignored");
            return ApplyOutcome::Ignored(IgnoreReason::UnknownKind);
        }
        if let Some(expected) = &self.state.request_id
            && expected != envelope.request_id()
        {
            debug!(
                expected = %expected,
                received = %envelope.request_id(),
                "event for another request ignored"
            );
            return ApplyOutcome::Ignored(IgnoreReason::ForeignRequest);
        }

        let EventEnvelope { payload, metadata } = envelope;
        let outcome = match payload {
            EventPayload::SessionStart(data) => {
                self.state.session_id = Some(data.session_id);
                self.state.start_time = Some(metadata.timestamp);
                ApplyOutcome::Applied
            }
            EventPayload::Thinking(data) => {
                self.state.thinking_text.push_str(&data.content);
                ApplyOutcome::Applied
            }
            EventPayload::ToolCallStart(data) => {
                self.upsert_tool(data.tool_id, data.tool_name, data.description, |record| {
                    record.arguments = data.arguments;
                });
                ApplyOutcome::Applied
            }
            EventPayload::ToolCallProgress(data) => match self.calling_tool(&data.tool_id) {
                Some(record) => {
                    record.progress = Some(data.progress);
                    record.progress_message = Some(data.message);
                    ApplyOutcome::Applied
                }
                None => unmatched_tool(&data.tool_id),
            },
            EventPayload::ToolCallEnd(data) => match self.calling_tool(&data.tool_id) {
                Some(record) => {
                    record.status = match data.status {
                        ToolStatus::Success => ToolCallStatus::Completed,
                        ToolStatus::Failed => ToolCallStatus::Failed,
                    };
                    record.result = data.result;
                    record.error = data.error;
                    record.duration_ms = metadata.duration_ms;
                    ApplyOutcome::Applied
                }
                None => unmatched_tool(&data.tool_id),
            },
            EventPayload::Content(data) => {
                self.state.main_text.push_str(&data.content);
                ApplyOutcome::Applied
            }
            EventPayload::Data(data) => {
                self.state.data_blocks.push(DataBlock {
                    data_type: data.data_type,
                    data: data.data,
                    metadata: data.metadata,
                    sequence: metadata.sequence,
                });
                ApplyOutcome::Applied
            }
            EventPayload::Error(data) => {
                self.record_error(data.message);
                self.state.error_kind = Some(data.error_type);
                self.state.recoverable = data.recoverable;
                self.state.session_status = Some(SessionStatus::Error);
                ApplyOutcome::Sealed
            }
            EventPayload::SessionEnd(data) => {
                self.state.session_status = Some(data.status);
                self.state.summary = data.summary;
                ApplyOutcome::Sealed
            }
            EventPayload::Custom { .. } => ApplyOutcome::Ignored(IgnoreReason::UnknownKind),
        };

        if !outcome.is_ignored() {
            self.start();
            if self.state.request_id.is_none() {
                self.state.request_id = Some(metadata.request_id);
            }
            self.state.last_sequence = Some(metadata.sequence);
            self.state.event_count += 1;
            if self.state.start_time.is_none() {
                self.state.start_time = Some(metadata.timestamp);
            }
            if outcome == ApplyOutcome::Sealed {
                self.state.end_time = Some(metadata.timestamp);
                self.seal();
            }
        }
        outcome
    }

    /// Apply a previous-generation flat envelope.
    pub fn apply_legacy(&mut self, event: LegacyEvent) -> ApplyOutcome {
        if self.is_sealed() {
            debug!(event_type = event.type_name(), "legacy event after seal ignored");
            return ApplyOutcome::Ignored(IgnoreReason::AfterSeal);
        }

        let outcome = match event {
            LegacyEvent::Thinking { content } => {
                self.state.thinking_text.push_str(&content);
                ApplyOutcome::Applied
            }
            LegacyEvent::ToolCall {
                tool_id,
                tool_name,
                tool_args,
            } => {
                self.upsert_tool(tool_id, tool_name, String::new(), |record| {
                    record.arguments = serde_json::from_str(&tool_args).ok();
                    record.raw_arguments = Some(tool_args);
                });
                ApplyOutcome::Applied
            }
            LegacyEvent::ToolResult { tool_id, status } => {
                let Some(status) = LegacyToolStatus::parse(&status) else {
                    debug!(%tool_id, %status, "unrecognized legacy tool status ignored");
                    return ApplyOutcome::Ignored(IgnoreReason::Malformed);
                };
                match self.calling_tool(&tool_id) {
                    Some(record) => {
                        record.status = match status {
                            LegacyToolStatus::Completed => ToolCallStatus::Completed,
                            LegacyToolStatus::Failed => ToolCallStatus::Failed,
                        };
                        ApplyOutcome::Applied
                    }
                    None => unmatched_tool(&tool_id),
                }
            }
            LegacyEvent::FinalAnswer { content } => {
                self.state.final_answer.push_str(&content);
                ApplyOutcome::Applied
            }
            LegacyEvent::DataframeData { data } => {
                self.state.latest_dataframe = Some(data);
                ApplyOutcome::Applied
            }
            LegacyEvent::Done => {
                self.state.session_status = Some(SessionStatus::Completed);
                ApplyOutcome::Sealed
            }
            LegacyEvent::Error { message } => {
                self.record_error(message);
                self.state.session_status = Some(SessionStatus::Error);
                ApplyOutcome::Sealed
            }
            LegacyEvent::Unknown => {
                debug!("unknown legacy event ignored");
                ApplyOutcome::Ignored(IgnoreReason::UnknownKind)
            }
        };

        if !outcome.is_ignored() {
            self.start();
            self.state.event_count += 1;
            if outcome == ApplyOutcome::Sealed {
                self.seal();
            }
        }
        outcome
    }

    fn upsert_tool(
        &mut self,
        tool_id: ToolId,
        tool_name: String,
        description: String,
        fill: impl FnOnce(&mut ToolCallRecord),
    ) {
        match self.state.tool_calls.get_mut(&tool_id) {
            Some(record) => {
                // A repeated start refreshes descriptive fields only.
                record.tool_name = tool_name;
                if !description.is_empty() {
                    record.description = description;
                }
                fill(record);
            }
            None => {
                let mut record = ToolCallRecord::calling(tool_id.clone(), tool_name, description);
                fill(&mut record);
                self.state.tool_calls.insert(tool_id, record);
            }
        }
    }

    fn calling_tool(&mut self, tool_id: &ToolId) -> Option<&mut ToolCallRecord> {
        self.state
            .tool_calls
            .get_mut(tool_id)
            .filter(|record| record.is_calling())
    }

    fn record_error(&mut self, message: String) {
        if !self.state.has_error {
            self.state.has_error = true;
            self.state.error_message = Some(message);
        }
    }

    fn seal(&mut self) {
        self.state.phase = TurnPhase::Sealed;
        self.state.streaming = false;
        if let Some(mut callback) = self.on_complete.take() {
            callback(&self.state);
        }
    }
}

fn unmatched_tool(tool_id: &ToolId) -> ApplyOutcome {
    debug!(%tool_id, "tool event without an open call ignored");
    ApplyOutcome::Ignored(IgnoreReason::UnmatchedTool)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chat_events::StreamEmitter;
    use chat_protocol::{
        ContentFormat, DataType, ErrorType, RequestId, SessionId, encode_line,
    };
    use serde_json::json;

    use super::*;

    fn feed(reducer: &mut TurnReducer, lines: &[String]) -> Vec<ApplyOutcome> {
        lines
            .iter()
            .map(|line| reducer.apply_line(line.trim_end()))
            .collect()
    }

    fn canonical_turn() -> Vec<String> {
        let mut emitter = StreamEmitter::new(RequestId::from_string("req_canon"));
        let tool = ToolId::from_string("T1");
        vec![
            emitter.emit_session_start(SessionId::from_string("sess_1")),
            emitter.emit_thinking("Analyzing ", None),
            emitter.emit_thinking("input", None),
            emitter.emit_tool_call_start(tool.clone(), "lookup", "desc", None),
            emitter.emit_tool_call_end(tool, ToolStatus::Success, None, None, None),
            emitter.emit_content("Answer: 42", ContentFormat::Markdown, false),
            emitter.emit_session_end(SessionStatus::Completed, None),
        ]
    }

    #[test]
    fn canonical_turn_folds_into_expected_state() {
        let mut reducer = TurnReducer::started();
        let outcomes = feed(&mut reducer, &canonical_turn());
        assert_eq!(outcomes.last(), Some(&ApplyOutcome::Sealed));

        let state = reducer.state();
        assert_eq!(state.thinking_text, "Analyzing input");
        assert_eq!(state.main_text, "Answer: 42");
        assert_eq!(state.tool_calls.len(), 1);
        assert_eq!(
            state.tool_calls[&ToolId::from_string("T1")].status,
            ToolCallStatus::Completed
        );
        assert!(!state.streaming);
        assert_eq!(state.phase, TurnPhase::Sealed);
        assert_eq!(state.session_id, Some(SessionId::from_string("sess_1")));
        assert_eq!(state.request_id, Some(RequestId::from_string("req_canon")));
        assert_eq!(state.session_status, Some(SessionStatus::Completed));
        assert_eq!(state.last_sequence, Some(6));
        assert_eq!(state.event_count, 7);
        assert!(state.start_time.is_some() && state.end_time.is_some());
        assert_eq!(state.summary.as_ref().unwrap()["total_events"], 6);
    }

    #[test]
    fn fragments_concatenate_in_arrival_order_including_empty() {
        let mut emitter = StreamEmitter::generate();
        let fragments = ["", "a", "", "bc", "d e ", ""];
        let mut reducer = TurnReducer::started();
        for fragment in fragments {
            reducer.apply_line(emitter.emit_content(fragment, ContentFormat::Text, false).trim_end());
            reducer.apply_line(emitter.emit_thinking(fragment, None).trim_end());
        }
        assert_eq!(reducer.state().main_text, fragments.concat());
        assert_eq!(reducer.state().thinking_text, fragments.concat());
        assert_eq!(reducer.state().event_count, 12);
        assert_eq!(reducer.state().last_sequence, Some(11));
    }

    #[test]
    fn failed_tool_end_marks_record_failed() {
        let mut emitter = StreamEmitter::generate();
        let tool = ToolId::from_string("T1");
        let mut reducer = TurnReducer::started();
        feed(
            &mut reducer,
            &[
                emitter.emit_tool_call_start(tool.clone(), "lookup", "desc", Some(json!({"q": 1}))),
                emitter.emit_tool_call_end(
                    tool.clone(),
                    ToolStatus::Failed,
                    None,
                    Some(json!("timeout")),
                    Some(40),
                ),
            ],
        );
        let record = &reducer.state().tool_calls[&tool];
        assert_eq!(record.status, ToolCallStatus::Failed);
        assert_eq!(record.error, Some(json!("timeout")));
        assert_eq!(record.duration_ms, Some(40));
        assert_eq!(record.arguments, Some(json!({"q": 1})));
        assert!(reducer.state().streaming, "a failed tool does not end the turn");
    }

    #[test]
    fn unknown_tool_end_mutates_nothing() {
        let mut emitter = StreamEmitter::new(RequestId::from_string("req_u"));
        let mut reducer = TurnReducer::started();
        reducer.apply_line(emitter.emit_content("x", ContentFormat::Markdown, false).trim_end());
        let before = reducer.state().clone();
        let outcome = reducer.apply_line(
            emitter
                .emit_tool_call_end(ToolId::from_string("ghost"), ToolStatus::Success, None, None, None)
                .trim_end(),
        );
        assert_eq!(outcome, ApplyOutcome::Ignored(IgnoreReason::UnmatchedTool));
        assert_eq!(reducer.state(), &before);
    }

    #[test]
    fn tool_transitions_at_most_once() {
        let mut emitter = StreamEmitter::generate();
        let tool = ToolId::from_string("T1");
        let mut reducer = TurnReducer::started();
        feed(
            &mut reducer,
            &[
                emitter.emit_tool_call_start(tool.clone(), "lookup", "desc", None),
                emitter.emit_tool_call_end(tool.clone(), ToolStatus::Success, Some(json!(1)), None, None),
                emitter.emit_tool_call_end(tool.clone(), ToolStatus::Failed, None, Some(json!("x")), None),
                emitter.emit_tool_call_start(tool.clone(), "lookup", "again", None),
            ],
        );
        let record = &reducer.state().tool_calls[&tool];
        assert_eq!(record.status, ToolCallStatus::Completed);
        assert_eq!(record.result, Some(json!(1)));
        assert_eq!(record.description, "again");
    }

    #[test]
    fn progress_updates_open_call_only() {
        let mut emitter = StreamEmitter::generate();
        let tool = ToolId::from_string("T1");
        let mut reducer = TurnReducer::started();
        let outcomes = feed(
            &mut reducer,
            &[
                emitter.emit_tool_call_progress(tool.clone(), 10.0, "early"),
                emitter.emit_tool_call_start(tool.clone(), "lookup", "desc", None),
                emitter.emit_tool_call_progress(tool.clone(), 50.0, "half"),
                emitter.emit_tool_call_end(tool.clone(), ToolStatus::Success, None, None, None),
                emitter.emit_tool_call_progress(tool.clone(), 90.0, "late"),
            ],
        );
        assert_eq!(outcomes[0], ApplyOutcome::Ignored(IgnoreReason::UnmatchedTool));
        assert_eq!(outcomes[4], ApplyOutcome::Ignored(IgnoreReason::UnmatchedTool));
        let record = &reducer.state().tool_calls[&tool];
        assert_eq!(record.progress, Some(50.0));
        assert_eq!(record.progress_message.as_deref(), Some("half"));
    }

    #[test]
    fn unknown_kind_is_invisible() {
        let lines = canonical_turn();
        let unknown = r#"data: {"type":"sparkle","data":{"x":1},"metadata":{"request_id":"req_canon","timestamp":1,"sequence":99}}"#;
        let legacy_unknown = r#"data: {"type":"sparkle","intensity":3}"#;

        for position in 0..lines.len() {
            let mut injected = lines.clone();
            injected.insert(position, unknown.to_string());
            injected.insert(position, legacy_unknown.to_string());

            let mut with = TurnReducer::started();
            feed(&mut with, &injected);
            let mut without = TurnReducer::started();
            feed(&mut without, &lines);
            assert_eq!(with.state(), without.state(), "injected at {position}");
        }
    }

    #[test]
    fn termination_is_sticky() {
        let mut emitter = StreamEmitter::new(RequestId::from_string("req_s"));
        let mut reducer = TurnReducer::started();
        let tool = ToolId::from_string("T1");
        feed(
            &mut reducer,
            &[
                emitter.emit_tool_call_start(tool.clone(), "lookup", "desc", None),
                emitter.emit_content("done", ContentFormat::Markdown, true),
                emitter.emit_session_end(SessionStatus::Completed, None),
            ],
        );
        let sealed = reducer.state().clone();

        let late = [
            emitter.emit_content("more", ContentFormat::Markdown, false),
            emitter.emit_thinking("late", None),
            emitter.emit_tool_call_end(tool, ToolStatus::Success, None, None, None),
            emitter.emit_error(ErrorType::System, "late", None, false),
            emitter.emit_session_end(SessionStatus::Error, None),
        ];
        for outcome in feed(&mut reducer, &late) {
            assert_eq!(outcome, ApplyOutcome::Ignored(IgnoreReason::AfterSeal));
        }
        for legacy in [
            r#"data: {"type":"final_answer","content":"x"}"#,
            r#"data: {"type":"thinking","content":"x"}"#,
            r#"data: {"type":"tool_call","tool_id":"T2","tool_name":"x","tool_args":"{}"}"#,
            r#"data: {"type":"done"}"#,
        ] {
            assert_eq!(
                reducer.apply_line(legacy),
                ApplyOutcome::Ignored(IgnoreReason::AfterSeal)
            );
        }
        assert_eq!(reducer.state(), &sealed);
    }

    #[test]
    fn error_seals_and_first_error_wins() {
        let mut emitter = StreamEmitter::generate();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut reducer = TurnReducer::started().on_complete(move |state| {
            assert!(!state.streaming);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcomes = feed(
            &mut reducer,
            &[
                emitter.emit_content("partial", ContentFormat::Markdown, false),
                emitter.emit_error(
                    ErrorType::Execution,
                    "model failed",
                    Some(json!({"code": 1})),
                    true,
                ),
                emitter.emit_error(ErrorType::System, "second", None, false),
                emitter.emit_session_end(SessionStatus::Error, None),
            ],
        );
        assert_eq!(outcomes[1], ApplyOutcome::Sealed);
        let state = reducer.state();
        assert!(state.has_error);
        assert_eq!(state.error_message.as_deref(), Some("model failed"));
        assert_eq!(state.error_kind, Some(ErrorType::Execution));
        assert!(state.recoverable);
        assert_eq!(state.session_status, Some(SessionStatus::Error));
        assert_eq!(state.main_text, "partial");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn current_line(event_type: &str, data: serde_json::Value, sequence: u64) -> String {
        let envelope = json!({
            "type": event_type,
            "data": data,
            "metadata": {"request_id": "req_new", "timestamp": 1_700_000_000_000u64, "sequence": sequence}
        });
        format!("data: {envelope}")
    }

    #[test]
    fn unrecognized_enum_values_still_apply() {
        let mut reducer = TurnReducer::started();
        let outcomes = feed(
            &mut reducer,
            &[
                current_line("thinking", json!({"content": "hmm", "stage": "reflecting"}), 0),
                current_line("content", json!({"content": "$x^2$", "format": "latex"}), 1),
                current_line("data", json!({"data_type": "geojson", "data": {"k": 1}}), 2),
            ],
        );
        assert_eq!(outcomes, vec![ApplyOutcome::Applied; 3]);
        let state = reducer.state();
        assert_eq!(state.thinking_text, "hmm");
        assert_eq!(state.main_text, "$x^2$");
        assert_eq!(state.data_blocks[0].data_type, DataType::Unknown);
        assert!(state.streaming);
    }

    #[test]
    fn unrecognized_error_type_still_seals() {
        let mut reducer = TurnReducer::started();
        let outcome = reducer.apply_line(&current_line(
            "error",
            json!({"error_type": "quota", "message": "limit reached"}),
            0,
        ));
        assert_eq!(outcome, ApplyOutcome::Sealed);
        let state = reducer.state();
        assert!(state.has_error);
        assert!(!state.streaming);
        assert_eq!(state.error_message.as_deref(), Some("limit reached"));
        assert_eq!(state.error_kind, Some(ErrorType::Unknown));
        assert_eq!(state.session_status, Some(SessionStatus::Error));
    }

    #[test]
    fn unrecognized_session_status_still_seals() {
        let mut reducer = TurnReducer::started();
        reducer.apply_line(&current_line("content", json!({"content": "partial"}), 0));
        let outcome = reducer.apply_line(&current_line(
            "session_end",
            json!({"status": "timeout"}),
            1,
        ));
        assert_eq!(outcome, ApplyOutcome::Sealed);
        let state = reducer.state();
        assert!(!state.streaming);
        assert_eq!(state.phase, TurnPhase::Sealed);
        assert_eq!(state.session_status, Some(SessionStatus::Unknown));
        assert_eq!(state.main_text, "partial");
    }

    #[test]
    fn fractional_timestamp_is_applied() {
        let mut reducer = TurnReducer::started();
        let line = r#"data: {"type":"content","data":{"content":"hi"},"metadata":{"request_id":"req_f","timestamp":1700000000000.5,"sequence":0}}"#;
        assert_eq!(reducer.apply_line(line), ApplyOutcome::Applied);
        assert_eq!(reducer.state().main_text, "hi");
        assert_eq!(reducer.state().start_time, Some(1_700_000_000_000));
    }

    #[test]
    fn legacy_tags_in_current_envelopes_are_unknown_kinds() {
        let mut reducer = TurnReducer::started();
        reducer.apply_line(&current_line("content", json!({"content": "answer"}), 0));
        for (sequence, event_type) in [(1, "final_answer"), (2, "done")] {
            let outcome =
                reducer.apply_line(&current_line(event_type, json!({"content": "legacy"}), sequence));
            assert_eq!(outcome, ApplyOutcome::Ignored(IgnoreReason::UnknownKind));
        }
        let state = reducer.state();
        assert!(state.streaming);
        assert!(!reducer.is_sealed());
        assert_eq!(state.final_answer, "");
        assert_eq!(state.main_text, "answer");
        assert_eq!(state.event_count, 1);
    }

    #[test]
    fn legacy_answer_then_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut reducer = TurnReducer::started().on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        reducer.apply_line(r#"data: {"type":"final_answer","content":"Hi"}"#);
        assert_eq!(reducer.apply_line(r#"data: {"type":"done"}"#), ApplyOutcome::Sealed);

        let state = reducer.state();
        assert_eq!(state.final_answer, "Hi");
        assert_eq!(state.display_text(), "Hi");
        assert!(!state.streaming);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn legacy_tool_lifecycle_and_dataframe_slot() {
        let mut reducer = TurnReducer::started();
        for line in [
            r#"data: {"type":"thinking","content":"Let me look. "}"#,
            r#"data: {"type":"tool_call","tool_id":"t1","tool_name":"sql","tool_args":"{\"q\":\"select\"}"}"#,
            r#"data: {"type":"tool_call","tool_id":"t2","tool_name":"plot","tool_args":"not json"}"#,
            r#"data: {"type":"tool_result","tool_id":"t1","status":"completed"}"#,
            r#"data: {"type":"tool_result","tool_id":"t2","status":"failed"}"#,
            r#"data: {"type":"tool_result","tool_id":"t3","status":"completed"}"#,
            r#"data: {"type":"dataframe_data","data":{"columns":["a"],"data":[[1]],"dataframe_name":"first"}}"#,
            r#"data: {"type":"dataframe_data","data":{"columns":["b"],"data":[[2]],"dataframe_name":"second"}}"#,
        ] {
            reducer.apply_line(line);
        }
        let state = reducer.state();
        assert_eq!(state.thinking_text, "Let me look. ");
        let order: Vec<&str> = state
            .tool_calls_ordered()
            .map(|record| record.tool_id.as_str())
            .collect();
        assert_eq!(order, ["t1", "t2"]);
        let t1 = &state.tool_calls[&ToolId::from_string("t1")];
        assert_eq!(t1.status, ToolCallStatus::Completed);
        assert_eq!(t1.arguments, Some(json!({"q": "select"})));
        assert_eq!(t1.raw_arguments.as_deref(), Some(r#"{"q":"select"}"#));
        let t2 = &state.tool_calls[&ToolId::from_string("t2")];
        assert_eq!(t2.status, ToolCallStatus::Failed);
        assert_eq!(t2.arguments, None);
        assert_eq!(
            state.latest_dataframe.as_ref().and_then(|df| df.dataframe_name.as_deref()),
            Some("second")
        );
        assert!(state.data_blocks.is_empty());
    }

    #[test]
    fn legacy_error_seals_with_message() {
        let mut reducer = TurnReducer::started();
        assert_eq!(
            reducer.apply_line(r#"data: {"type":"error","message":"bad"}"#),
            ApplyOutcome::Sealed
        );
        assert!(reducer.state().has_error);
        assert_eq!(reducer.state().error_message.as_deref(), Some("bad"));
        assert_eq!(reducer.state().error_kind, None);
    }

    #[test]
    fn malformed_line_then_valid_content() {
        let mut emitter = StreamEmitter::generate();
        let mut reducer = TurnReducer::started();
        assert_eq!(
            reducer.apply_line("data: {not json"),
            ApplyOutcome::Ignored(IgnoreReason::Malformed)
        );
        reducer.apply_line("");
        reducer.apply_line(emitter.emit_content("ok", ContentFormat::Markdown, false).trim_end());
        assert_eq!(reducer.state().main_text, "ok");
        assert_eq!(reducer.state().event_count, 1);
    }

    #[test]
    fn data_blocks_keep_duplicates_in_order() {
        let mut emitter = StreamEmitter::generate();
        let mut reducer = TurnReducer::started();
        let block = json!({"name": "t", "rows": [[1]]});
        feed(
            &mut reducer,
            &[
                emitter.emit_data(DataType::Dataframe, block.clone(), None),
                emitter.emit_data(DataType::Chart, json!({"kind": "bar"}), None),
                emitter.emit_data(DataType::Dataframe, block.clone(), None),
            ],
        );
        let blocks = &reducer.state().data_blocks;
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].data, blocks[2].data);
        assert_eq!(blocks[1].data_type, DataType::Chart);
        assert_eq!(
            blocks.iter().map(|b| b.sequence).collect::<Vec<_>>(),
            [0, 1, 2]
        );
    }

    #[test]
    fn foreign_request_events_are_ignored() {
        let mut ours = StreamEmitter::new(RequestId::from_string("req_a"));
        let mut theirs = StreamEmitter::new(RequestId::from_string("req_b"));
        let mut reducer = TurnReducer::new();
        reducer.apply_line(ours.emit_content("mine", ContentFormat::Markdown, false).trim_end());
        let outcome = reducer.apply_line(
            theirs
                .emit_content("not mine", ContentFormat::Markdown, false)
                .trim_end(),
        );
        assert_eq!(outcome, ApplyOutcome::Ignored(IgnoreReason::ForeignRequest));
        assert_eq!(reducer.state().main_text, "mine");
    }

    #[test]
    fn first_event_starts_an_idle_turn() {
        let mut reducer = TurnReducer::new();
        assert_eq!(reducer.state().phase, TurnPhase::Idle);
        assert!(!reducer.state().streaming);
        reducer.apply_line(r#"data: {"type":"thinking","content":"x"}"#);
        assert_eq!(reducer.state().phase, TurnPhase::Streaming);
        assert!(reducer.state().streaming);
    }

    #[test]
    fn line_round_trip_matches_direct_application() {
        let mut emitter = StreamEmitter::new(RequestId::from_string("req_rt"));
        let tool = ToolId::from_string("T1");
        let envelopes = vec![
            emitter.envelope(
                EventPayload::ToolCallStart(chat_protocol::ToolCallStartData {
                    tool_id: tool.clone(),
                    tool_name: "lookup".into(),
                    description: "d".into(),
                    arguments: Some(json!({"nested": {"a": [1, 2.5, null]}})),
                }),
                None,
            ),
            emitter.envelope(
                EventPayload::ToolCallEnd(chat_protocol::ToolCallEndData {
                    tool_id: tool,
                    status: ToolStatus::Success,
                    result: Some(json!({"unicode": "héllo ✓"})),
                    error: None,
                }),
                Some(12),
            ),
            emitter.envelope(
                EventPayload::Data(chat_protocol::DataBlockData {
                    data_type: DataType::Image,
                    data: json!({"url": "x"}),
                    metadata: Some(json!({"alt": "y"})),
                }),
                None,
            ),
        ];

        let mut direct = TurnReducer::started();
        let mut wired = TurnReducer::started();
        for envelope in envelopes {
            let line = encode_line(&envelope);
            direct.apply_envelope(envelope);
            wired.apply_line(line.trim_end());
        }
        assert_eq!(direct.state(), wired.state());
    }
}
