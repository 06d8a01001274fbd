//! Storage layer - persisted conversation history.

mod jsonl;

use crate::domain::Exchange;
use crate::error::Result;

pub use jsonl::JsonlHistoryStore;

/// Durable per-session exchange log.
pub trait HistoryStore: Send + Sync {
    /// All stored exchanges for a session, oldest first. Unknown sessions are empty.
    fn load(&self, session_id: &str) -> Result<Vec<Exchange>>;

    /// Append one exchange to the session's log.
    fn append(&self, session_id: &str, exchange: &Exchange) -> Result<()>;

    /// Delete the session's log. Removing an unknown session is not an error.
    fn remove(&self, session_id: &str) -> Result<()>;
}
