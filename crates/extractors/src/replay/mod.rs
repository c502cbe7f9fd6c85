//! File-backed historical extractor.

mod extractor;
mod parse;

pub use extractor::ReplayExtractor;
pub use parse::{parse_timestamp, parse_value};
