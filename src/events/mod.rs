//! Event types and sinks.
//!
//! The risk core never talks to a global emitter. Every component that emits
//! receives a [`RiskEventSink`] from its owner; the external dispatcher sits
//! behind that trait (usually a [`ChannelSink`]).

mod sink;
mod types;

pub use sink::{
    ChannelSink, EventLog, LoggedEvent, NullSink, RecordingSink, RiskEventSink, SharedSink,
};
pub use types::{ActionOrigin, RiskAction, RiskEvent};
