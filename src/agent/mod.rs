//! Agent - the conversation-aware generate/validate/execute/repair loop

pub mod agent_loop;
pub mod signal;

pub use agent_loop::{AgentConfig, AgentLoop, DEFAULT_MAX_ATTEMPTS};
pub use signal::{CancelFlag, NoOpStopSignal, StopSignal};
