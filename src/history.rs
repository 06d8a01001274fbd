//! Conversation history - a fixed-capacity window of recent exchanges.
//!
//! Appends go to the tail and evict from the head once capacity is exceeded,
//! so the context handed to the generator has a hard upper bound.

use std::collections::VecDeque;

use crate::domain::Exchange;

/// Default number of exchanges retained per session
pub const DEFAULT_CAPACITY: usize = 3;

/// Ordered, bounded history of exchanges. Owned by exactly one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    capacity: usize,
    entries: VecDeque<Exchange>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConversationHistory {
    /// Create an empty history. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Build a history from stored exchanges, keeping only the newest `capacity`.
    pub fn from_exchanges(capacity: usize, exchanges: impl IntoIterator<Item = Exchange>) -> Self {
        let mut history = Self::new(capacity);
        for exchange in exchanges {
            history.append(exchange);
        }
        history
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the tail, evicting the oldest entries beyond capacity.
    pub fn append(&mut self, exchange: Exchange) {
        self.entries.push_back(exchange);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Snapshot of the retained exchanges, oldest first.
    pub fn recent(&self) -> Vec<Exchange> {
        self.entries.iter().cloned().collect()
    }

    /// Exchanges handed to the generator as context.
    ///
    /// Failed exchanges still occupy a retention slot; `include_failed` only
    /// controls whether they are shown to the generator.
    pub fn context(&self, include_failed: bool) -> Vec<Exchange> {
        self.entries
            .iter()
            .filter(|exchange| include_failed || exchange.succeeded())
            .cloned()
            .collect()
    }

    /// Most recent exchange that produced a successful statement.
    pub fn last_successful(&self) -> Option<&Exchange> {
        self.entries
            .iter()
            .rev()
            .find(|exchange| exchange.succeeded() && exchange.generated_statement.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter()
    }

    /// Reset to empty (session reset).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
