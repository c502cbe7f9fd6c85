//! Pipeline events.
//!
//! Steady-state failures never abort the process; they surface as events
//! through a [`PipelineEventSink`] supplied by the host (logging in the
//! worker, collection in tests).

mod pipeline_event;
mod sink;

pub use pipeline_event::*;
pub use sink::*;
