//! Server-side turn orchestration.
//!
//! [`ChatRuntime::start_turn`] validates the session, persists the user
//! message, runs a [`ReasoningEngine`] against the merged token/tool channel,
//! and streams sequenced event lines until `session_end`.

pub mod demo;
pub mod engine;
pub mod runtime;
pub mod toolkit;

pub use demo::{DemoEngine, ScriptedEngine};
pub use engine::{EngineRequest, HistoryEntry, ReasoningEngine};
pub use runtime::{
    ChatRequest, ChatRuntime, RuntimeBuilder, RuntimeConfig, TurnHandle, TurnOutcome,
};
pub use toolkit::{DISPLAY_TABLE, ToolDefinition, Toolkit};
