//! Cancellation signals checked by the agent loop between states

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

/// Checked at the Generating, Validating and Executing boundaries.
#[async_trait]
pub trait StopSignal: Send + Sync {
    /// Whether the running turn should be abandoned.
    async fn should_stop(&self) -> bool;
}

/// Never cancels.
pub struct NoOpStopSignal;

#[async_trait]
impl StopSignal for NoOpStopSignal {
    async fn should_stop(&self) -> bool {
        false
    }
}

/// Shared flag, set from another task (e.g. a Ctrl-C handler).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StopSignal for CancelFlag {
    async fn should_stop(&self) -> bool {
        self.is_cancelled()
    }
}
