//! Server side of the streaming chat protocol.
//!
//! [`StreamEmitter`] owns sequencing, timestamps, and request correlation for
//! one turn. [`EventMux`] merges the engine's token and tool sub-streams into
//! the single ordered channel the emitter drains.

pub mod emitter;
pub mod mux;

pub use emitter::{Clock, StreamEmitter};
pub use mux::{EngineItem, EngineSinks, EventMux, TokenSink, ToolSink};
