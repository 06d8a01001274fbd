//! Domain types for sqlpilot
//!
//! This module contains the core domain types:
//! - Exchange: one recorded conversation turn, and its flat persisted record
//! - CandidateStatement: a generated, not yet validated statement
//! - ErrorKind: closed failure taxonomy driving retry decisions
//! - ExecutionOutcome / TurnOutcome / LoopResult: what execution and the loop return

pub mod candidate;
pub mod exchange;
pub mod outcome;

pub use candidate::{CandidateOrigin, CandidateStatement};
pub use exchange::{Exchange, ExchangeOutcome, ExchangeRecord};
pub use outcome::{ErrorKind, ExecutionOutcome, ExecutionSuccess, LoopResult, QueryRows, TurnOutcome};
