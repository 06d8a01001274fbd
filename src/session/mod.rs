//! Session manager - one conversation history per session, one turn at a time.
//!
//! A turn checks the session's history out of the map, runs the agent loop
//! against it, persists the new exchange and checks it back in. While checked
//! out the slot is marked busy and further turns for that session are refused.
//! The map lock is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::agent::{AgentLoop, NoOpStopSignal, StopSignal};
use crate::datasource::DataSource;
use crate::domain::{ErrorKind, Exchange, LoopResult};
use crate::error::{Result, SqlPilotError};
use crate::generator::StatementGenerator;
use crate::history::ConversationHistory;
use crate::storage::HistoryStore;

enum SessionSlot {
    Idle(ConversationHistory),
    Busy,
}

type SessionMap = Mutex<HashMap<String, SessionSlot>>;

/// Owns a checked-out history and returns it to the map when dropped,
/// including when the turn's future is dropped mid-flight.
struct CheckedOut<'a> {
    sessions: &'a SessionMap,
    session_id: String,
    history: Option<ConversationHistory>,
}

impl CheckedOut<'_> {
    fn history_mut(&mut self) -> &mut ConversationHistory {
        self.history.get_or_insert_with(ConversationHistory::default)
    }
}

impl Drop for CheckedOut<'_> {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match self.history.take() {
            Some(history) => {
                sessions.insert(self.session_id.clone(), SessionSlot::Idle(history));
            }
            None => {
                sessions.remove(&self.session_id);
            }
        }
    }
}

pub struct SessionManager<G, D>
where
    G: StatementGenerator,
    D: DataSource,
{
    agent: AgentLoop<G, D>,
    store: Option<Arc<dyn HistoryStore>>,
    history_window: usize,
    sessions: SessionMap,
}

impl<G, D> SessionManager<G, D>
where
    G: StatementGenerator,
    D: DataSource,
{
    /// In-memory sessions only.
    pub fn new(agent: AgentLoop<G, D>, history_window: usize) -> Self {
        Self {
            agent,
            store: None,
            history_window,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Persist every exchange to `store` and restore sessions from it.
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn agent(&self) -> &AgentLoop<G, D> {
        &self.agent
    }

    /// Run one turn for `session_id`.
    pub async fn submit_turn(&self, session_id: &str, utterance: &str) -> Result<LoopResult> {
        self.submit_turn_with(session_id, utterance, &NoOpStopSignal).await
    }

    /// Run one turn, checking `stop` between agent states.
    pub async fn submit_turn_with(&self, session_id: &str, utterance: &str, stop: &dyn StopSignal) -> Result<LoopResult> {
        let mut checked_out = self.check_out(session_id)?;
        log::info!("Session {}: {}", session_id, utterance);

        let result = self.agent.run(utterance, checked_out.history_mut(), stop).await;

        if result.outcome.error_kind() != Some(ErrorKind::Cancelled)
            && let Some(store) = &self.store
            && let Some(exchange) = checked_out.history_mut().iter().last()
            && let Err(e) = store.append(session_id, exchange)
        {
            // The turn already happened; only its durability is lost.
            log::warn!("Session {}: failed to persist exchange: {}", session_id, e);
        }

        Ok(result)
    }

    /// Current window of a session, oldest first.
    pub fn history(&self, session_id: &str) -> Result<Vec<Exchange>> {
        {
            let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            match sessions.get(session_id) {
                Some(SessionSlot::Idle(history)) => return Ok(history.recent()),
                Some(SessionSlot::Busy) => return Err(SqlPilotError::SessionBusy(session_id.to_string())),
                None => {}
            }
        }
        Ok(self.load(session_id)?.recent())
    }

    /// Full persisted log of a session (not limited to the window).
    pub fn transcript(&self, session_id: &str) -> Result<Vec<Exchange>> {
        match &self.store {
            Some(store) => store.load(session_id),
            None => self.history(session_id),
        }
    }

    /// Forget a session's history, in memory and on disk.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(sessions.get(session_id), Some(SessionSlot::Busy)) {
                return Err(SqlPilotError::SessionBusy(session_id.to_string()));
            }
            sessions.remove(session_id);
        }
        if let Some(store) = &self.store {
            store.remove(session_id)?;
        }
        log::info!("Session {} reset", session_id);
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<ConversationHistory> {
        let exchanges = match &self.store {
            Some(store) => store.load(session_id)?,
            None => Vec::new(),
        };
        Ok(ConversationHistory::from_exchanges(self.history_window, exchanges))
    }

    fn check_out(&self, session_id: &str) -> Result<CheckedOut<'_>> {
        let existing = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            match sessions.insert(session_id.to_string(), SessionSlot::Busy) {
                Some(SessionSlot::Busy) => return Err(SqlPilotError::SessionBusy(session_id.to_string())),
                Some(SessionSlot::Idle(history)) => Some(history),
                None => None,
            }
        };

        let mut checked_out = CheckedOut {
            sessions: &self.sessions,
            session_id: session_id.to_string(),
            history: None,
        };
        // On a load error the guard drops with no history and frees the slot.
        checked_out.history = Some(match existing {
            Some(history) => history,
            None => self.load(session_id)?,
        });
        Ok(checked_out)
    }
}
