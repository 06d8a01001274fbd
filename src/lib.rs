//! sqlpilot - conversation-aware natural language to SQL
//!
//! Each question runs a bounded generate, validate, execute, repair loop:
//! the model proposes a read-only statement, a static validator gates it, a
//! guarded executor runs it, and retriable failures are fed back into the
//! next attempt. Completed turns are remembered per session so follow-ups
//! can refine earlier queries.

pub mod agent;
pub mod datasource;
pub mod domain;
pub mod error;
pub mod generator;
pub mod guard;
pub mod history;
pub mod llm;
pub mod session;
pub mod storage;
pub mod validation;

pub use error::{Result, SqlPilotError};
