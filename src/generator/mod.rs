//! Statement generation - natural language to a candidate SQL statement
//!
//! This module provides:
//! - StatementGenerator trait, the seam the agent loop generates through
//! - LlmStatementGenerator, backed by any LlmClient
//! - prompt rendering and model-output cleaning
//! - ScriptedGenerator for tests

pub mod llm;
pub mod prompt;
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CandidateStatement, ErrorKind, Exchange};
use crate::llm::LlmError;

pub use llm::{GeneratorConfig, LlmStatementGenerator};
pub use prompt::{clean_output, is_follow_up};
pub use scripted::ScriptedGenerator;

/// A prior failure packaged for the next generation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairContext {
    /// Attempt number this repair will be (the first repair is attempt 2)
    pub attempt: u32,
    /// Candidate that failed, when the failure happened after generation
    pub failed_statement: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl RepairContext {
    pub fn new(attempt: u32, failed_statement: Option<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            attempt,
            failed_statement,
            kind,
            message: message.into(),
        }
    }

    /// One-line description recorded on the repaired candidate.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

/// Everything one generation attempt needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub utterance: String,
    /// Prior exchanges, oldest first
    pub history: Vec<Exchange>,
    pub repair: Option<RepairContext>,
}

impl GenerationRequest {
    pub fn new(utterance: impl Into<String>, history: Vec<Exchange>) -> Self {
        Self {
            utterance: utterance.into(),
            history,
            repair: None,
        }
    }

    pub fn with_repair(mut self, repair: RepairContext) -> Self {
        self.repair = Some(repair);
        self
    }

    /// Most recent exchange in the context with a successful statement.
    pub fn last_successful(&self) -> Option<&Exchange> {
        self.history
            .iter()
            .rev()
            .find(|exchange| exchange.succeeded() && exchange.generated_statement.is_some())
    }

    /// Wrap generated text in a candidate tagged with this request's origin.
    pub fn candidate(&self, text: impl Into<String>) -> CandidateStatement {
        match &self.repair {
            None => CandidateStatement::initial(text),
            Some(repair) => CandidateStatement::repaired(text, repair.attempt, repair.summary()),
        }
    }
}

/// Errors that can occur while generating a candidate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("LLM call exceeded {0:?}")]
    Timeout(Duration),

    #[error("model returned no statement")]
    Empty,

    #[error("model output is not a query: {0}")]
    NotAQuery(String),
}

/// Produces candidate statements. Implementations must not mutate history.
#[async_trait]
pub trait StatementGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<CandidateStatement, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateOrigin, ExchangeOutcome};

    #[test]
    fn test_candidate_origin_follows_request() {
        let request = GenerationRequest::new("top movies", Vec::new());
        assert_eq!(request.candidate("SELECT 1").origin, CandidateOrigin::Initial);

        let repair = RepairContext::new(2, Some("SELEC 1".to_string()), ErrorKind::SyntaxError, "near \"SELEC\"");
        let request = request.with_repair(repair);
        let candidate = request.candidate("SELECT 1");
        assert_eq!(
            candidate.origin,
            CandidateOrigin::Repaired {
                attempt: 2,
                prior_error: "syntax_error: near \"SELEC\"".to_string()
            }
        );
    }

    #[test]
    fn test_last_successful_skips_failures() {
        let history = vec![
            Exchange::new(
                "action movies",
                Some("SELECT title FROM movies WHERE genre = 'Action'".to_string()),
                ExchangeOutcome::Success("4 rows".to_string()),
            ),
            Exchange::new(
                "drop it",
                None,
                ExchangeOutcome::Failure {
                    kind: ErrorKind::MaxAttemptsExceeded,
                    message: "gave up".to_string(),
                },
            ),
        ];
        let request = GenerationRequest::new("only from 2020", history);
        assert_eq!(request.last_successful().unwrap().utterance, "action movies");
    }

    #[test]
    fn test_generation_error_display() {
        assert_eq!(GenerationError::Empty.to_string(), "model returned no statement");
        let err: GenerationError = LlmError::Network("reset".to_string()).into();
        assert_eq!(err.to_string(), "LLM call failed: Network error: reset");
    }
}
