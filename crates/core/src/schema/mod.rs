//! Schema model builder.
//!
//! A schema is a static, named field list. Sinks map it onto their native
//! representation (table definition, file header, cache payload) through
//! `OutputSink::ensure_schema`; nothing generates types at runtime.
//!
//! ```text
//! SchemaCatalog (builtin + JSON overlay)
//!       │ lookup(name) -> SchemaSpec
//!       ▼
//! SchemaResolver ── validates once ──► Arc<SchemaModel> (cached by name)
//! ```

mod catalog;
mod resolver;
mod schema_model;

pub use catalog::{BuiltinSchemaCatalog, FieldSpec, SchemaCatalog, SchemaSpec};
pub use resolver::SchemaResolver;
pub use schema_model::{FieldDef, FieldType, SchemaModel};
