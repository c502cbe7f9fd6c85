//! Reference output sinks for seriesflow.
//!
//! Every sink implements [`seriesflow_core::sinks::OutputSink`]. Diesel and
//! rusqlite stay inside this crate; the engine only sees `SinkError`.
//!
//! ```text
//!                  OutputAllocator (one worker per sink)
//!                  │              │               │
//!                  ▼              ▼               ▼
//!            SqliteSink       CacheSink        FileSink
//!                │                │                │
//!          WriteHandle      KeyValueStore    <root>/<ds>/<asset>/<sym>/<schema>.csv
//!                │
//!            SQLite DB
//! ```

pub mod cache;
pub mod db;
pub mod errors;
pub mod factory;
pub mod file;
pub mod sqlite;

pub use cache::{CacheSink, InMemoryStore, KeyValueStore};
pub use db::{create_pool, init, DbPool, WriteHandle};
pub use errors::StorageError;
pub use factory::{build_sinks, SinkSettings};
pub use file::{FileFormat, FileSink};
pub use sqlite::SqliteSink;
