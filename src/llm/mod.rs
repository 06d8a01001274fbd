//! LLM Client Layer - chat-completion API integration
//!
//! This module provides:
//! - Message types for LLM communication
//! - LlmClient trait for API abstraction
//! - OpenRouterClient implementation
//! - MockLlmClient for tests

pub mod client;
pub mod openrouter;
pub mod types;

pub use client::{LlmClient, LlmError, MockLlmClient};
pub use openrouter::{DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL, OpenRouterClient, OpenRouterConfig};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage};
