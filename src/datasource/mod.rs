//! Data source layer - read-only statement execution and schema introspection
//!
//! This module provides:
//! - DataSource trait for backend abstraction
//! - SqliteDataSource implementation on rusqlite
//! - ScriptedDataSource for tests
//! - Schema description types shared with the validator and the generator

pub mod scripted;
pub mod sqlite;

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::QueryRows;

pub use scripted::ScriptedDataSource;
pub use sqlite::SqliteDataSource;

/// Raw backend failures, before the guard classifies them
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataSourceError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query exceeded {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Query(String),
}

/// A column as declared in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Read-only access to a tabular backend.
///
/// Implementations must be safe to share across sessions.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run a single read-only statement, returning at most `fetch_limit` rows.
    async fn execute_readonly(
        &self,
        sql: &str,
        timeout: Duration,
        fetch_limit: usize,
    ) -> Result<QueryRows, DataSourceError>;

    /// Tables and columns visible to generated statements.
    async fn describe_schema(&self) -> Result<Vec<TableSchema>, DataSourceError>;
}

/// Plain-text schema description used in the generator's system prompt.
pub fn render_schema(tables: &[TableSchema]) -> String {
    let mut out = String::new();
    for table in tables {
        let _ = writeln!(out, "Table: {}", table.name);
        for column in &table.columns {
            if column.data_type.is_empty() {
                let _ = writeln!(out, "  - {}", column.name);
            } else {
                let _ = writeln!(out, "  - {} ({})", column.name, column.data_type);
            }
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_schema() {
        let tables = vec![
            TableSchema::new(
                "movies",
                vec![ColumnSchema::new("title", "TEXT"), ColumnSchema::new("release_year", "INTEGER")],
            ),
            TableSchema::new("tags", vec![ColumnSchema::new("label", "")]),
        ];
        let text = render_schema(&tables);
        assert_eq!(
            text,
            "Table: movies\n  - title (TEXT)\n  - release_year (INTEGER)\nTable: tags\n  - label"
        );
    }

    #[test]
    fn test_render_empty_schema() {
        assert_eq!(render_schema(&[]), "");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DataSourceError::Connection("no file".to_string()).to_string(),
            "Connection failed: no file"
        );
        assert_eq!(
            DataSourceError::Query("near \"SELEC\": syntax error".to_string()).to_string(),
            "near \"SELEC\": syntax error"
        );
    }
}
