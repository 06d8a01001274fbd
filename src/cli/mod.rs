//! CLI module for sqlpilot - command-line interface and subcommands.
//!
//! Provides one-shot questions, an interactive chat, and session history
//! management.

pub mod commands;

pub use commands::Cli;
