//! Client side of the streaming chat protocol.
//!
//! - [`state`]: `TurnState`, the per-turn aggregate a UI renders
//! - [`reducer`]: `TurnReducer`, dual-generation dispatch and accumulation
//! - [`lines`]: `LineBuffer` and the async [`drain`] loop

pub mod lines;
pub mod reducer;
pub mod state;

pub use lines::{DEFAULT_MAX_LINE_BYTES, DrainOutcome, LineBuffer, drain};
pub use reducer::{ApplyOutcome, IgnoreReason, TurnReducer};
pub use state::{DataBlock, ToolCallRecord, ToolCallStatus, TurnPhase, TurnState};
