//! Statement validation - the read-only safety gate.
//!
//! - `lexer`: comment-aware SQL tokenizer
//! - `rules`: `StatementValidator` and the closed set of rejection reasons
//! - `schema`: optional table/column allowlist
//! - `predicates`: WHERE-clause predicate extraction for follow-up context

pub mod lexer;
pub mod predicates;
pub mod rules;
pub mod schema;

pub use predicates::where_predicates;
pub use rules::{
    DEFAULT_DENIED_VERBS, DEFAULT_MAX_STATEMENT_CHARS, RejectReason, StatementValidator, ValidationVerdict,
    ValidatorConfig,
};
pub use schema::SchemaAllowlist;
