//! Line framing and protocol-generation detection.
//!
//! Each event travels as one `data: <json>` line. Decoding is stateless and
//! total: anything that is not a recognizable event yields `None`, never an
//! error, because a line may be a partial delivery unit.

use crate::event::EventEnvelope;
use crate::legacy::LegacyEvent;
use serde_json::{Value, json};

/// Literal prefix of every event line.
pub const DATA_PREFIX: &str = "data: ";

/// Which envelope generation a decoded object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolGeneration {
    Current,
    Legacy,
}

impl ProtocolGeneration {
    /// Current iff the object carries both `data` and `metadata`. Shape is the
    /// sole discriminator; there is no version tag.
    pub fn detect(value: &Value) -> Self {
        match value.as_object() {
            Some(object) if object.contains_key("data") && object.contains_key("metadata") => {
                Self::Current
            }
            _ => Self::Legacy,
        }
    }
}

/// An event decoded from the wire, tagged by generation.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Current(EventEnvelope),
    Legacy(LegacyEvent),
}

impl DecodedEvent {
    pub fn generation(&self) -> ProtocolGeneration {
        match self {
            Self::Current(_) => ProtocolGeneration::Current,
            Self::Legacy(_) => ProtocolGeneration::Legacy,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Current(envelope) => envelope.payload.type_name(),
            Self::Legacy(event) => event.type_name(),
        }
    }
}

/// Classify and decode a parsed JSON value.
pub fn decode_value(value: Value) -> Option<DecodedEvent> {
    match ProtocolGeneration::detect(&value) {
        ProtocolGeneration::Current => serde_json::from_value(value)
            .ok()
            .map(DecodedEvent::Current),
        ProtocolGeneration::Legacy => serde_json::from_value(value)
            .ok()
            .map(DecodedEvent::Legacy),
    }
}

/// Decode one complete line. Lines without the `data: ` prefix (including
/// blank keep-alives) and unparseable payloads yield `None`.
pub fn parse_line(line: &str) -> Option<DecodedEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let value: Value = serde_json::from_str(payload).ok()?;
    decode_value(value)
}

/// Frame an envelope as a push-stream event: `data: <json>` plus the blank
/// line that terminates a server-sent event.
pub fn encode_line(envelope: &EventEnvelope) -> String {
    let payload = serde_json::to_string(envelope).unwrap_or_else(|error| {
        json!({
            "type": "error",
            "data": {
                "error_type": "system",
                "message": "event serialization failed",
                "details": { "exception": error.to_string() },
                "recoverable": false,
            },
            "metadata": envelope.metadata,
        })
        .to_string()
    });
    format!("{DATA_PREFIX}{payload}\n\n")
}
