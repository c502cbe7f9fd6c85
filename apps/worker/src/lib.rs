pub mod config;
mod main_lib;

pub use main_lib::{build_pipeline, count_keys, describe_plan, init_tracing, Pipeline};
