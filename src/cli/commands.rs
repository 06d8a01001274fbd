//! CLI command definitions using clap.
//!
//! - ask: answer one question and exit
//! - chat: interactive conversation
//! - history: show or export a session's exchanges
//! - clear: forget a session
//! - schema: print the schema shown to the model

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_SESSION: &str = "default";

/// sqlpilot - ask questions of a SQL database in plain language
#[derive(Parser, Debug)]
#[command(name = "sqlpilot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate one question to SQL, run it and print the result
    Ask {
        /// The question, in plain language
        question: String,

        /// Conversation session to continue
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Start an interactive conversation
    Chat {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Show a session's conversation history
    History {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,

        /// Write the history to this file as JSON
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Forget a session's conversation history
    Clear {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Print the database schema given to the model
    Schema,
}

impl Commands {
    /// Session the command operates on, if any.
    pub fn session(&self) -> Option<&str> {
        match self {
            Commands::Ask { session, .. }
            | Commands::Chat { session }
            | Commands::History { session, .. }
            | Commands::Clear { session } => Some(session),
            Commands::Schema => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["sqlpilot"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["sqlpilot", "-v", "schema"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["sqlpilot", "schema", "-c", "/path/to/sqlpilot.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/sqlpilot.yml")));
    }

    #[test]
    fn test_ask_default_session() {
        let cli = Cli::try_parse_from(["sqlpilot", "ask", "how many movies?"]).unwrap();
        match &cli.command {
            Commands::Ask { question, session } => {
                assert_eq!(question, "how many movies?");
                assert_eq!(session, DEFAULT_SESSION);
            }
            _ => panic!("Expected ask command"),
        }
        assert_eq!(cli.command.session(), Some(DEFAULT_SESSION));
    }

    #[test]
    fn test_ask_requires_question() {
        assert!(Cli::try_parse_from(["sqlpilot", "ask"]).is_err());
    }

    #[test]
    fn test_chat_with_session() {
        let cli = Cli::try_parse_from(["sqlpilot", "chat", "--session", "work"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { ref session } if session == "work"));
    }

    #[test]
    fn test_history_export() {
        let cli = Cli::try_parse_from(["sqlpilot", "history", "-s", "work", "--export", "out.json"]).unwrap();
        match cli.command {
            Commands::History { session, export } => {
                assert_eq!(session, "work");
                assert_eq!(export, Some(PathBuf::from("out.json")));
            }
            _ => panic!("Expected history command"),
        }
    }

    #[test]
    fn test_clear_and_schema() {
        let cli = Cli::try_parse_from(["sqlpilot", "clear"]).unwrap();
        assert!(matches!(cli.command, Commands::Clear { .. }));

        let cli = Cli::try_parse_from(["sqlpilot", "schema"]).unwrap();
        assert!(matches!(cli.command, Commands::Schema));
        assert_eq!(cli.command.session(), None);
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
