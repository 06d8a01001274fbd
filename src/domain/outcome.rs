//! Outcome types for statement execution and conversation turns.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed failure taxonomy for a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The model call failed or returned unusable text
    GenerationFailure,
    /// The statement violated a safety/shape rule and was never executed
    ValidationRejection,
    /// The data source rejected the statement as malformed
    SyntaxError,
    /// Unclassified execution failure
    Unknown,
    /// The data source refused access
    PermissionError,
    /// The data source could not be reached
    ConnectionError,
    /// Execution exceeded the wall-clock ceiling
    Timeout,
    /// The shared attempt budget ran out
    MaxAttemptsExceeded,
    /// The turn was cancelled by the caller
    Cancelled,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::GenerationFailure,
        ErrorKind::ValidationRejection,
        ErrorKind::SyntaxError,
        ErrorKind::Unknown,
        ErrorKind::PermissionError,
        ErrorKind::ConnectionError,
        ErrorKind::Timeout,
        ErrorKind::MaxAttemptsExceeded,
        ErrorKind::Cancelled,
    ];

    /// Whether regenerating the statement can plausibly fix this failure.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::GenerationFailure | ErrorKind::ValidationRejection | ErrorKind::SyntaxError | ErrorKind::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::GenerationFailure => "generation_failure",
            ErrorKind::ValidationRejection => "validation_rejection",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::Unknown => "unknown",
            ErrorKind::PermissionError => "permission_error",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MaxAttemptsExceeded => "max_attempts_exceeded",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Parse the snake_case name written by [`ErrorKind::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Process exit code surfaced to scripting callers.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::PermissionError => 3,
            ErrorKind::ConnectionError => 4,
            ErrorKind::Timeout => 5,
            ErrorKind::MaxAttemptsExceeded => 6,
            ErrorKind::GenerationFailure => 7,
            ErrorKind::ValidationRejection => 8,
            ErrorKind::SyntaxError => 9,
            ErrorKind::Unknown => 10,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tabular query result. Cells are JSON values so any backend can fill them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A successful execution, after the row ceiling was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSuccess {
    pub rows: QueryRows,
    pub row_count: usize,
    /// True when the data source produced more rows than the ceiling
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ExecutionSuccess {
    /// Short human-readable summary stored in conversation history.
    pub fn summary(&self) -> String {
        let noun = if self.row_count == 1 { "row" } else { "rows" };
        if self.truncated {
            format!("{} {} (truncated)", self.row_count, noun)
        } else {
            format!("{} {}", self.row_count, noun)
        }
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(ExecutionSuccess),
    Failure { kind: ErrorKind, message: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}

/// Terminal outcome of a conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Success(ExecutionSuccess),
    Failure { kind: ErrorKind, message: String },
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TurnOutcome::Success(_))
    }

    /// Failure kind, if the turn failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TurnOutcome::Success(_) => None,
            TurnOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.error_kind().map_or(0, |kind| kind.exit_code())
    }
}

impl From<ExecutionOutcome> for TurnOutcome {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success(success) => TurnOutcome::Success(success),
            ExecutionOutcome::Failure { kind, message } => TurnOutcome::Failure { kind, message },
        }
    }
}

/// What the agent loop hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopResult {
    /// Last statement the generator produced, if any
    pub final_statement: Option<String>,
    pub outcome: TurnOutcome,
    /// Number of generator invocations this turn
    pub attempts_used: u32,
}
