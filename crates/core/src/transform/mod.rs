//! Transformer pipeline.
//!
//! Transformers consume one or more series and emit a derived series. They are
//! declared in a JSON file, built by kind through [`TransformerFactory`], and
//! wired into a DAG at startup; cycles are a configuration error.
//!
//! ```text
//! record(X) ─► consumers[X] ─► JoinBuffer (latest | aligned) ─► Transformer::transform
//!                                                                     │
//!                                        derived record(Z) ◄──────────┘
//!                                              │
//!                                              └─► consumers[Z] ... (topological order)
//! ```

mod builtin;
mod definition;
mod factory;
mod join;
mod pipeline;
mod traits;

pub use builtin::{MidTransformer, SpreadTransformer};
pub use definition::{JoinPolicy, OutputDeclaration, TransformerDefinition};
pub use factory::TransformerFactory;
pub use pipeline::{PipelineOutput, TransformerPipeline};
pub use traits::{TransformContext, Transformer};
