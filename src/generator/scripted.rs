//! Scripted generator for tests

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{GenerationError, GenerationRequest, StatementGenerator};
use crate::domain::CandidateStatement;

/// Replays queued outputs and records each request it was given.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    outputs: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: Option<Result<String, GenerationError>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(outputs: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            ..Default::default()
        }
    }

    /// Queue statements that all generate successfully
    pub fn with_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(statements.into_iter().map(|s| Ok(s.into())).collect())
    }

    /// Answer every call with the same output
    pub fn always(output: Result<String, GenerationError>) -> Self {
        Self {
            fallback: Some(output),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl StatementGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<CandidateStatement, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let next = self.outputs.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let output = next
            .or_else(|| self.fallback.clone())
            .unwrap_or(Err(GenerationError::Empty))?;
        Ok(request.candidate(output))
    }
}
