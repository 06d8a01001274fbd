//! Execution guard - runs accepted statements under a row ceiling and a deadline
//!
//! The guard never fails: every backend error is classified into an
//! [`ErrorKind`] and returned as an [`ExecutionOutcome::Failure`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::datasource::{DataSource, DataSourceError};
use crate::domain::{ErrorKind, ExecutionOutcome, ExecutionSuccess};

/// Default row ceiling
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Default execution deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SYNTAX_PATTERNS: &[&str] = &[
    "syntax error",
    "no such column",
    "no such table",
    "no such function",
    "near \"",
    "incomplete input",
    "ambiguous column",
    "misuse of aggregate",
    "wrong number of arguments",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "not authorized",
    "access denied",
    "readonly database",
    "insufficient privileges",
];

const CONNECTION_PATTERNS: &[&str] = &[
    "unable to open database",
    "connection",
    "disk i/o error",
    "database is locked",
    "network",
];

const TIMEOUT_PATTERNS: &[&str] = &["interrupted", "timed out", "timeout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardConfig {
    pub max_rows: usize,
    pub timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct ExecutionGuard<D: DataSource> {
    source: Arc<D>,
    config: GuardConfig,
}

impl<D: DataSource> ExecutionGuard<D> {
    pub fn new(source: Arc<D>, config: GuardConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Execute one statement. Rows beyond `max_rows` are dropped and the
    /// result is marked truncated.
    pub async fn execute(&self, statement: &str) -> ExecutionOutcome {
        let max_rows = self.config.max_rows;
        let timeout = self.config.timeout;
        let started = Instant::now();

        let call = self
            .source
            .execute_readonly(statement, timeout, max_rows.saturating_add(1));
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DataSourceError::Timeout(timeout)),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(mut rows) => {
                let truncated = rows.len() > max_rows;
                rows.rows.truncate(max_rows);
                let row_count = rows.len();
                log::debug!(
                    "Statement returned {} rows in {:?}{}",
                    row_count,
                    elapsed,
                    if truncated { " (truncated)" } else { "" }
                );
                ExecutionOutcome::Success(ExecutionSuccess {
                    rows,
                    row_count,
                    truncated,
                    elapsed,
                })
            }
            Err(err) => {
                let kind = classify(&err);
                log::info!("Statement failed as {}: {}", kind, err);
                ExecutionOutcome::Failure {
                    kind,
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Map a raw backend error onto the execution error taxonomy.
pub fn classify(err: &DataSourceError) -> ErrorKind {
    match err {
        DataSourceError::Connection(_) => ErrorKind::ConnectionError,
        DataSourceError::Timeout(_) => ErrorKind::Timeout,
        DataSourceError::Query(message) => classify_message(message),
    }
}

fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lowered.contains(p));

    if matches(SYNTAX_PATTERNS) {
        ErrorKind::SyntaxError
    } else if matches(PERMISSION_PATTERNS) {
        ErrorKind::PermissionError
    } else if matches(CONNECTION_PATTERNS) {
        ErrorKind::ConnectionError
    } else if matches(TIMEOUT_PATTERNS) {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    }
}
