//! SQLite sink: one table per schema, upsert by primary key, all writes
//! serialized through a [`WriteHandle`] actor.

mod table;

pub use table::{table_name, TableLayout, META_COLUMNS};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

use crate::db::{create_pool, init, spawn_writer, WriteHandle};
use crate::errors::StorageError;
use seriesflow_core::errors::SinkError;
use seriesflow_core::records::{FieldValue, Record};
use seriesflow_core::schema::SchemaModel;
use seriesflow_core::sinks::{OutputSink, SeriesRoute, SinkKind};

pub struct SqliteSink {
    id: String,
    db_url: String,
    writer: WriteHandle,
    layouts: DashMap<String, Arc<TableLayout>>,
}

impl SqliteSink {
    /// Opens (or creates) the database at `db_path` and starts its writer.
    /// Must be called from within a tokio runtime.
    pub fn open(id: impl Into<String>, db_path: &Path) -> Result<Self, StorageError> {
        let db_url = init(db_path)?;
        let pool = create_pool(&db_url)?;
        let writer = spawn_writer(pool.as_ref().clone());
        Ok(Self {
            id: id.into(),
            db_url,
            writer,
            layouts: DashMap::new(),
        })
    }

    pub fn db_url(&self) -> &str {
        &self.db_url
    }

    fn layout(&self, schema: &SchemaModel) -> Arc<TableLayout> {
        self.layouts
            .entry(schema.name().to_string())
            .or_insert_with(|| Arc::new(TableLayout::new(schema)))
            .clone()
    }
}

#[async_trait]
impl OutputSink for SqliteSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Database
    }

    // the writer actor commits jobs it has already received
    fn cancel_safe(&self) -> bool {
        false
    }

    async fn ensure_schema(&self, schema: &SchemaModel) -> Result<(), SinkError> {
        // replaces any layout from an earlier version of the schema
        let layout = Arc::new(TableLayout::new(schema));
        self.layouts
            .insert(schema.name().to_string(), Arc::clone(&layout));
        let table = layout.table().to_string();
        let added = self
            .writer
            .exec(move |conn| layout.ensure(conn))
            .await?;
        debug!(
            "Sink {} ensured table {} ({} columns added)",
            self.id,
            table,
            added.len()
        );
        Ok(())
    }

    async fn write(
        &self,
        record: &Record,
        route: &SeriesRoute,
        schema: &SchemaModel,
    ) -> Result<(), SinkError> {
        let layout = self.layout(schema);
        let mut values: Vec<FieldValue> = vec![
            FieldValue::Text(record.series_id().to_string()),
            FieldValue::Text(route.data_source.clone()),
            FieldValue::Text(route.asset_type.clone()),
            FieldValue::Text(record.symbol().to_string()),
        ];
        values.extend(schema.values(record));

        self.writer
            .exec(move |conn| layout.upsert(conn, values))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        info!("Sink {} closed ({})", self.id, self.db_url);
        Ok(())
    }
}
