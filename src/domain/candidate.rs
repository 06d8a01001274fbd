//! Candidate statements produced by the generator.

/// Where a candidate came from within the current turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOrigin {
    Initial,
    /// Produced by a repair attempt (1-based attempt number of the retry)
    Repaired { attempt: u32, prior_error: String },
}

/// An unvalidated statement. Lives for one loop iteration only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateStatement {
    pub text: String,
    pub origin: CandidateOrigin,
}

impl CandidateStatement {
    pub fn initial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: CandidateOrigin::Initial,
        }
    }

    pub fn repaired(text: impl Into<String>, attempt: u32, prior_error: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: CandidateOrigin::Repaired {
                attempt,
                prior_error: prior_error.into(),
            },
        }
    }

    pub fn is_repair(&self) -> bool {
        matches!(self.origin, CandidateOrigin::Repaired { .. })
    }
}
