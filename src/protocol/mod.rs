//! Protocol module - envelopes, flow-control messages, window bookkeeping.
//!
//! - Envelope shape and the closed set of operation tags
//! - `set`/`reset` control payloads and notification payload builders
//! - Sliding-window accounting for backpressure

pub mod control;
mod wire_format;
mod window;

pub use control::{CloseInfo, ResetWindow, SetWindow};
pub use window::{FlowStats, FlowWindow, ReceiveDecision};
pub use wire_format::{Envelope, Operation, OP_KEY, PAYLOAD_KEY};
