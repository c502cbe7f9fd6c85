//! Series registry: declarative time-series definitions.
//!
//! ```text
//! registry.csv ──► SeriesRegistry::load ──► Vec<SeriesDefinition>
//!                        │                        │
//!                        └─ SchemaCatalog         └─► SeriesFilter (kind/source/asset type/schema)
//! ```

mod filter;
mod registry;
mod series_model;

pub use filter::SeriesFilter;
pub use registry::{SeriesRegistry, REQUIRED_COLUMNS};
pub use series_model::{ExtractorKind, SeriesDefinition, DEFAULT_ASSET_TYPE};
