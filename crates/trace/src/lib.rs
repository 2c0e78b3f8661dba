//! `axle-trace` -- append-only structured run log.
//!
//! One JSON record per line, per run: action attempts, screenshot
//! references, state observations, control-plane decisions, and errors.
//! [`TraceWriter`] is the write side (and the runner's attempt sink);
//! [`TraceReplay`] is the tolerant read side.

pub mod error;
pub mod event;
pub mod replay;
pub mod writer;

pub use error::TraceError;
pub use event::{
    ActionEvent, DecisionEvent, ErrorEvent, ScreenshotEvent, StateEvent, TraceEvent, TracePayload,
};
pub use replay::{RunSummary, TraceReplay};
pub use writer::TraceWriter;
