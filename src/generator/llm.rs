//! LLM-backed statement generator

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::prompt::{clean_output, system_prompt, user_prompt};
use super::{GenerationError, GenerationRequest, StatementGenerator};
use crate::domain::CandidateStatement;
use crate::llm::{CompletionRequest, LlmClient, Message};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Deadline for one LLM call
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

/// Renders each request into a fresh completion call.
///
/// The generator is stateless: conversation context arrives in the request.
pub struct LlmStatementGenerator<L: LlmClient> {
    llm: Arc<L>,
    system_prompt: String,
    config: GeneratorConfig,
}

impl<L: LlmClient> LlmStatementGenerator<L> {
    /// `schema` is the plain-text description shown to the model.
    pub fn new(llm: Arc<L>, schema: &str, config: GeneratorConfig) -> Self {
        Self {
            llm,
            system_prompt: system_prompt(schema),
            config,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn build_request(&self, request: &GenerationRequest) -> CompletionRequest {
        CompletionRequest {
            system: self.system_prompt.clone(),
            messages: vec![Message::user(user_prompt(request))],
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            ..Default::default()
        }
    }
}

#[async_trait]
impl<L: LlmClient> StatementGenerator for LlmStatementGenerator<L> {
    async fn generate(&self, request: &GenerationRequest) -> Result<CandidateStatement, GenerationError> {
        let completion = self.build_request(request);

        let response = tokio::time::timeout(self.config.timeout, self.llm.complete(completion))
            .await
            .map_err(|_| GenerationError::Timeout(self.config.timeout))??;

        if response.stop_reason.is_truncated() {
            log::warn!("Model output hit the token limit; statement may be incomplete");
        }

        let text = clean_output(&response.content)?;
        log::debug!("Generated SQL: {}", text);
        Ok(request.candidate(text))
    }
}
