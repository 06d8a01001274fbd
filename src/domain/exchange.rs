//! Exchange record and its persisted form
//!
//! An Exchange pairs one utterance with the statement generated for it and the
//! terminal outcome of the turn. It is written once by the agent loop and never
//! mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::{ErrorKind, TurnOutcome};
use crate::error::{Result, SqlPilotError};

/// Outcome as remembered in conversation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Summary of the result set (e.g. "12 rows")
    Success(String),
    Failure { kind: ErrorKind, message: String },
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeOutcome::Success(_))
    }
}

impl From<&TurnOutcome> for ExchangeOutcome {
    fn from(outcome: &TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Success(success) => ExchangeOutcome::Success(success.summary()),
            TurnOutcome::Failure { kind, message } => ExchangeOutcome::Failure {
                kind: *kind,
                message: message.clone(),
            },
        }
    }
}

/// One completed conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ExchangeRecord", try_from = "ExchangeRecord")]
pub struct Exchange {
    pub utterance: String,
    pub generated_statement: Option<String>,
    pub outcome: ExchangeOutcome,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(utterance: impl Into<String>, generated_statement: Option<String>, outcome: ExchangeOutcome) -> Self {
        Self::at(utterance, generated_statement, outcome, Utc::now())
    }

    pub fn at(
        utterance: impl Into<String>,
        generated_statement: Option<String>,
        outcome: ExchangeOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            utterance: utterance.into(),
            generated_statement,
            outcome,
            timestamp,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }

    /// Equality ignoring the timestamp.
    pub fn same_turn(&self, other: &Exchange) -> bool {
        self.utterance == other.utterance
            && self.generated_statement == other.generated_statement
            && self.outcome == other.outcome
    }
}

/// Flat on-disk shape of an Exchange:
/// `{utterance, generated_statement, outcome_kind, message, timestamp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub utterance: String,
    pub generated_statement: Option<String>,
    /// "success" or an [`ErrorKind`] name
    pub outcome_kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

const SUCCESS_KIND: &str = "success";

impl From<Exchange> for ExchangeRecord {
    fn from(exchange: Exchange) -> Self {
        let (outcome_kind, message) = match exchange.outcome {
            ExchangeOutcome::Success(summary) => (SUCCESS_KIND.to_string(), summary),
            ExchangeOutcome::Failure { kind, message } => (kind.as_str().to_string(), message),
        };
        Self {
            utterance: exchange.utterance,
            generated_statement: exchange.generated_statement,
            outcome_kind,
            message,
            timestamp: exchange.timestamp,
        }
    }
}

impl TryFrom<ExchangeRecord> for Exchange {
    type Error = SqlPilotError;

    fn try_from(record: ExchangeRecord) -> Result<Self> {
        let outcome = if record.outcome_kind == SUCCESS_KIND {
            ExchangeOutcome::Success(record.message)
        } else {
            let kind = ErrorKind::parse(&record.outcome_kind)
                .ok_or_else(|| SqlPilotError::Storage(format!("Unknown outcome kind: {}", record.outcome_kind)))?;
            ExchangeOutcome::Failure {
                kind,
                message: record.message,
            }
        };
        Ok(Self {
            utterance: record.utterance,
            generated_statement: record.generated_statement,
            outcome,
            timestamp: record.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_record_shape() {
        let exchange = Exchange::new(
            "show action movies",
            Some("SELECT title FROM movies WHERE genre = 'Action'".to_string()),
            ExchangeOutcome::Success("12 rows".to_string()),
        );

        let value = serde_json::to_value(&exchange).unwrap();
        assert_eq!(value["utterance"], "show action movies");
        assert_eq!(value["outcome_kind"], "success");
        assert_eq!(value["message"], "12 rows");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_failure_without_statement() {
        let exchange = Exchange::new(
            "drop everything",
            None,
            ExchangeOutcome::Failure {
                kind: ErrorKind::MaxAttemptsExceeded,
                message: "validation_rejection: forbidden verb DROP".to_string(),
            },
        );

        let json = serde_json::to_string(&exchange).unwrap();
        assert!(json.contains("\"generated_statement\":null"));
        assert!(json.contains("\"outcome_kind\":\"max_attempts_exceeded\""));

        let restored: Exchange = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, exchange);
    }

    #[test]
    fn test_unknown_outcome_kind_is_rejected() {
        let json = r#"{"utterance":"x","generated_statement":null,"outcome_kind":"exploded","message":"","timestamp":"2025-01-01T00:00:00Z"}"#;
        let result: std::result::Result<Exchange, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_same_turn_ignores_timestamp() {
        let a = Exchange::at(
            "count them",
            Some("SELECT COUNT(*) FROM movies".to_string()),
            ExchangeOutcome::Success("1 row".to_string()),
            "2025-01-01T00:00:00Z".parse().unwrap(),
        );
        let mut b = a.clone();
        b.timestamp = "2025-06-01T12:00:00Z".parse().unwrap();
        assert!(a.same_turn(&b));
        assert_ne!(a, b);
    }
}
