use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::definition::{JoinPolicy, OutputDeclaration};
use crate::errors::TransformationError;
use crate::records::Record;

/// What a transformer knows about the stage it runs in.
pub struct TransformContext<'a> {
    pub transformer_id: &'a str,
    pub output: &'a OutputDeclaration,
}

impl TransformContext<'_> {
    /// An empty output record already stamped with the declared series,
    /// symbol and schema.
    pub fn output_record(&self, timestamp: DateTime<Utc>) -> Record {
        Record::new(
            self.output.series_id.as_str(),
            self.output.symbol(),
            self.output.schema.as_str(),
            timestamp,
        )
    }
}

/// A pure record-to-record computation over one or more input series.
pub trait Transformer: Send + Sync {
    /// Consumed series ids. `transform` receives one record per entry, in this order.
    fn required_inputs(&self) -> &[String];

    fn join_policy(&self) -> JoinPolicy;

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        inputs: &[Arc<Record>],
    ) -> Result<Vec<Record>, TransformationError>;
}
