//! SQLite data source
//!
//! Each call opens the database read-only, so a statement that slips past the
//! validator still cannot write. Queries run on the blocking pool and are
//! interrupted when the deadline passes or the caller gives up on them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, InterruptHandle, OpenFlags};
use serde_json::Value;

use super::{ColumnSchema, DataSource, DataSourceError, TableSchema};
use crate::domain::QueryRows;

/// How long to wait on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// VM instructions between cancellation checks
const PROGRESS_OPS: i32 = 10_000;

pub struct SqliteDataSource {
    path: PathBuf,
    /// Tables to describe; empty means every user table
    tables: Vec<String>,
}

impl SqliteDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tables: Vec::new(),
        }
    }

    /// Restrict schema description to the named tables.
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, DataSourceError> {
        if !self.path.exists() {
            return Err(DataSourceError::Connection(format!(
                "unable to open database file: {}",
                self.path.display()
            )));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| DataSourceError::Connection(format!("{}: {}", self.path.display(), e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DataSourceError::Connection(e.to_string()))?;
        Ok(conn)
    }
}

#[async_trait]
impl DataSource for SqliteDataSource {
    async fn execute_readonly(
        &self,
        sql: &str,
        timeout: Duration,
        fetch_limit: usize,
    ) -> Result<QueryRows, DataSourceError> {
        let conn = self.open()?;
        let mut interrupt = InterruptOnDrop::new(conn.get_interrupt_handle());
        let cancelled = interrupt.flag();
        let deadline = Instant::now() + timeout;
        let sql = sql.to_string();

        // The handler also stops statements that start after an interrupt was sent.
        conn.progress_handler(
            PROGRESS_OPS,
            Some(move || cancelled.load(Ordering::Relaxed) || Instant::now() >= deadline),
        );

        let task = tokio::task::spawn_blocking(move || run_query(&conn, &sql, fetch_limit));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => {
                interrupt.disarm();
                result.map_err(|e| classify(e, timeout))
            }
            Ok(Err(join_err)) => {
                interrupt.disarm();
                Err(DataSourceError::Query(format!("query task failed: {}", join_err)))
            }
            Err(_) => {
                log::warn!("Interrupting query after {:?}", timeout);
                Err(DataSourceError::Timeout(timeout))
            }
        }
    }

    async fn describe_schema(&self) -> Result<Vec<TableSchema>, DataSourceError> {
        let conn = self.open()?;
        let wanted = self.tables.clone();

        tokio::task::spawn_blocking(move || read_schema(&conn, &wanted))
            .await
            .map_err(|e| DataSourceError::Query(format!("schema task failed: {}", e)))?
            .map_err(|e| DataSourceError::Query(e.to_string()))
    }
}

/// Interrupts the running statement when dropped, unless disarmed first.
///
/// Covers both our own deadline and a caller dropping the future (an outer
/// timeout), so a runaway query never keeps its blocking thread.
struct InterruptOnDrop {
    handle: InterruptHandle,
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl InterruptOnDrop {
    fn new(handle: InterruptHandle) -> Self {
        Self {
            handle,
            cancelled: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.store(true, Ordering::Relaxed);
            self.handle.interrupt();
        }
    }
}

fn run_query(conn: &Connection, sql: &str, fetch_limit: usize) -> rusqlite::Result<QueryRows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while out.len() < fetch_limit {
        let Some(row) = rows.next()? else {
            break;
        };
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(to_json(row.get_ref(i)?));
        }
        out.push(cells);
    }

    Ok(QueryRows::new(columns, out))
}

fn read_schema(conn: &Connection, wanted: &[String]) -> rusqlite::Result<Vec<TableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut columns_stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
    let mut tables = Vec::new();
    for name in names {
        if !wanted.is_empty() && !wanted.iter().any(|w| w.eq_ignore_ascii_case(&name)) {
            continue;
        }
        let columns = columns_stmt
            .query_map([&name], |row| {
                Ok(ColumnSchema::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tables.push(TableSchema::new(name, columns));
    }
    Ok(tables)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("x'{}'", hex::encode(bytes))),
    }
}

fn classify(err: rusqlite::Error, timeout: Duration) -> DataSourceError {
    match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => DataSourceError::Timeout(timeout),
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => DataSourceError::Connection(err.to_string()),
        _ => DataSourceError::Query(err.to_string()),
    }
}
