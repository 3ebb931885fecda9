//! Event bus utilities providing fan-out and sinks for scheduler events.
//!
//! Every accepted job status transition is emitted as one
//! [`Event::Transition`]; diagnostic events carry human-readable notes
//! from the scheduler internals. Sinks consume events from a flume
//! channel drained by a background listener task.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{DiagnosticEvent, Event, TransitionEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
