use diesel::sql_types::{BigInt, Double, Nullable, Text};
use diesel::sqlite::Sqlite;
use diesel::{QueryableByName, RunQueryDsl, SqliteConnection};
use log::info;
use std::collections::HashSet;

use crate::errors::StorageError;
use seriesflow_core::records::{format_timestamp, FieldValue};
use seriesflow_core::schema::{FieldType, SchemaModel};

/// Columns every table carries ahead of the schema fields.
pub const META_COLUMNS: [&str; 4] = ["series_id", "data_source", "asset_type", "symbol"];

#[derive(Debug, Clone)]
struct Column {
    name: String,
    sql_type: &'static str,
    not_null: bool,
}

#[derive(QueryableByName)]
struct TableColumn {
    #[diesel(sql_type = Text)]
    name: String,
}

/// SQL rendering of one schema: one table per schema, primary key
/// `(series_id, symbol, <schema key fields>)`.
#[derive(Debug, Clone)]
pub struct TableLayout {
    table: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl TableLayout {
    pub fn new(schema: &SchemaModel) -> Self {
        let mut columns: Vec<Column> = META_COLUMNS
            .iter()
            .map(|name| Column {
                name: name.to_string(),
                sql_type: "TEXT",
                not_null: true,
            })
            .collect();
        columns.extend(schema.fields().iter().map(|f| Column {
            name: f.name.clone(),
            sql_type: sql_type(f.field_type),
            not_null: !f.nullable,
        }));

        let mut primary_key = vec!["series_id".to_string(), "symbol".to_string()];
        primary_key.extend(schema.key_fields().iter().cloned());

        Self {
            table: table_name(schema.name()),
            columns,
            primary_key,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.not_null { " NOT NULL" } else { "" };
                format!("{} {}{}", quote(&c.name), c.sql_type, null)
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            quote(&self.table),
            columns.join(", "),
            quote_list(&self.primary_key)
        )
    }

    pub fn upsert_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let updates: Vec<String> = names
            .iter()
            .filter(|n| !self.primary_key.contains(n))
            .map(|n| format!("{0} = excluded.{0}", quote(n)))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            quote(&self.table),
            quote_list(&names),
            placeholders,
            quote_list(&self.primary_key),
            updates.join(", ")
        )
    }

    /// Creates the table or adds the columns it is missing. Returns the
    /// names of added columns.
    ///
    /// Added columns are always nullable: SQLite cannot add a NOT NULL column
    /// to a populated table without a default.
    pub fn ensure(&self, conn: &mut SqliteConnection) -> Result<Vec<String>, StorageError> {
        diesel::sql_query(self.create_sql()).execute(conn)?;

        let existing: HashSet<String> =
            diesel::sql_query(format!("PRAGMA table_info({})", quote(&self.table)))
                .load::<TableColumn>(conn)?
                .into_iter()
                .map(|c| c.name)
                .collect();

        let mut added = Vec::new();
        for column in self.columns.iter().filter(|c| !existing.contains(&c.name)) {
            diesel::sql_query(format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote(&self.table),
                quote(&column.name),
                column.sql_type
            ))
            .execute(conn)?;
            added.push(column.name.clone());
        }
        if !added.is_empty() {
            info!("Migrated table {}: added {:?}", self.table, added);
        }
        Ok(added)
    }

    /// Inserts one row, replacing the non-key columns of an existing row with
    /// the same primary key. `values` are positional, in column order.
    pub fn upsert(
        &self,
        conn: &mut SqliteConnection,
        values: Vec<FieldValue>,
    ) -> Result<(), StorageError> {
        if values.len() != self.columns.len() {
            return Err(StorageError::SerializationError(format!(
                "{} values for {} columns of {}",
                values.len(),
                self.columns.len(),
                self.table
            )));
        }

        let mut query = diesel::sql_query(self.upsert_sql()).into_boxed::<Sqlite>();
        for value in values {
            query = match value {
                FieldValue::Null => query.bind::<Nullable<Text>, _>(None::<String>),
                FieldValue::Bool(v) => query.bind::<BigInt, _>(i64::from(v)),
                FieldValue::Int(v) => query.bind::<BigInt, _>(v),
                FieldValue::Float(v) => query.bind::<Double, _>(v),
                FieldValue::Text(v) => query.bind::<Text, _>(v),
                FieldValue::Timestamp(v) => query.bind::<Text, _>(format_timestamp(&v)),
            };
        }
        query.execute(conn)?;
        Ok(())
    }
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Int | FieldType::Bool => "INTEGER",
        FieldType::Float => "REAL",
        // RFC 3339 with fixed nanosecond width sorts chronologically
        FieldType::Text | FieldType::Timestamp => "TEXT",
    }
}

/// `mbp-1` becomes `mbp_1`.
pub fn table_name(schema_name: &str) -> String {
    schema_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn quote_list(names: &[String]) -> String {
    names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", ")
}
