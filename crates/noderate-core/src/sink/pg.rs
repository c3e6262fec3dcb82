//! PostgreSQL sink: one table per destination, rows appended in a
//! single transaction per record set.

use std::collections::HashSet;

use postgres::types::ToSql;
use postgres::{Client, NoTls};
use tracing::{debug, info};

use super::{Sink, SinkError};
use crate::record::{RecordSet, Scalar};

static NULL_TEXT: Option<String> = None;
static NULL_FLOAT: Option<f64> = None;
static NULL_TIMESTAMP: Option<chrono::DateTime<chrono::Utc>> = None;

/// SQL type of a destination column, inferred from the first non-null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    Float,
    Timestamp,
}

impl ColumnType {
    fn of(value: &Scalar) -> Self {
        match value {
            Scalar::Text(_) => ColumnType::Text,
            Scalar::Float(_) => ColumnType::Float,
            Scalar::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Timestamp => "TIMESTAMPTZ",
        }
    }

    fn null(self) -> &'static (dyn ToSql + Sync) {
        match self {
            ColumnType::Text => &NULL_TEXT,
            ColumnType::Float => &NULL_FLOAT,
            ColumnType::Timestamp => &NULL_TIMESTAMP,
        }
    }
}

/// Appends record sets to PostgreSQL tables named after their destination.
pub struct PostgresSink {
    client: Client,
    /// Destinations whose table has been ensured on this connection.
    ensured: HashSet<String>,
}

impl PostgresSink {
    pub fn connect(connection_string: &str) -> Result<Self, SinkError> {
        let client = Client::connect(connection_string, NoTls)
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        debug!("PostgreSQL sink connected");
        Ok(Self {
            client,
            ensured: HashSet::new(),
        })
    }

    fn ensure_table(&mut self, set: &RecordSet, types: &[ColumnType]) -> Result<(), SinkError> {
        if self.ensured.contains(&set.destination) {
            return Ok(());
        }
        self.client
            .batch_execute(&create_table_sql(&set.destination, &set.columns, types))
            .map_err(|e| SinkError::Query(e.to_string()))?;
        self.ensured.insert(set.destination.clone());
        Ok(())
    }
}

impl Sink for PostgresSink {
    fn append(&mut self, set: &RecordSet) -> Result<(), SinkError> {
        if set.is_empty() {
            return Ok(());
        }

        let types = column_types(set);
        self.ensure_table(set, &types)?;

        let rows: Vec<Vec<Option<Scalar>>> = set
            .records
            .iter()
            .map(|r| set.columns.iter().map(|c| r.get(c)).collect())
            .collect();

        let query = |e: postgres::Error| SinkError::Query(e.to_string());
        let mut tx = self.client.transaction().map_err(query)?;
        let stmt = tx
            .prepare(&insert_sql(&set.destination, &set.columns))
            .map_err(query)?;

        for row in &rows {
            let params: Vec<&(dyn ToSql + Sync)> = row
                .iter()
                .zip(&types)
                .map(|(value, ty)| sql_param(value.as_ref(), *ty))
                .collect();
            tx.execute(&stmt, &params).map_err(query)?;
        }
        tx.commit().map_err(query)?;

        info!(destination = %set.destination, rows = rows.len(), "inserted rows");
        Ok(())
    }
}

fn sql_param(value: Option<&Scalar>, ty: ColumnType) -> &(dyn ToSql + Sync) {
    match value {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Float(v)) => v,
        Some(Scalar::Timestamp(t)) => t,
        None => ty.null(),
    }
}

fn column_types(set: &RecordSet) -> Vec<ColumnType> {
    set.columns
        .iter()
        .map(|column| {
            set.records
                .iter()
                .find_map(|r| r.get(column))
                .map(|v| ColumnType::of(&v))
                .unwrap_or(ColumnType::Text)
        })
        .collect()
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn create_table_sql(table: &str, columns: &[String], types: &[ColumnType]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .zip(types)
        .map(|(c, t)| format!("{} {}", quote_ident(c), t.sql()))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        defs.join(", ")
    )
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}
