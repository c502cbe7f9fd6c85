//! Records and the destination key convention.

mod destination_key;
mod field_value;
mod record;

pub use destination_key::{destination_key, DestinationKey};
pub use field_value::{format_timestamp, FieldValue};
pub use record::Record;
