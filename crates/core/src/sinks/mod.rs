//! Output sink capability contract.
//!
//! Concrete sinks (SQLite, cache, files) live in `seriesflow-sinks`; the core
//! only sees [`OutputSink`] handles keyed by destination id.

mod mock;
mod route;
mod traits;

pub use mock::MockOutputSink;
pub use route::SeriesRoute;
pub use traits::{OutputSink, SinkKind};
