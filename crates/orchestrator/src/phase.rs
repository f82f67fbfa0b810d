//! Per-request lifecycle.

use serde::{Deserialize, Serialize};

use codebox_core::{Error, ExecutionStatus, Result};

/// Lifecycle phase of one execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    Pending,
    Validating,
    Rejected,
    Preparing,
    Running,
    Completed,
    Failed,
    Timeout,
    ResourceLimitExceeded,
    Error,
    Cancelled,
    CleanedUp,
}

impl ExecutionPhase {
    /// Phase that ends a run with `status`.
    pub fn terminal(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Completed => ExecutionPhase::Completed,
            ExecutionStatus::Failed => ExecutionPhase::Failed,
            ExecutionStatus::Timeout => ExecutionPhase::Timeout,
            ExecutionStatus::SecurityViolation => ExecutionPhase::Rejected,
            ExecutionStatus::ResourceLimitExceeded => ExecutionPhase::ResourceLimitExceeded,
            ExecutionStatus::Error => ExecutionPhase::Error,
            ExecutionStatus::Cancelled => ExecutionPhase::Cancelled,
        }
    }

    fn is_run_outcome(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed
                | ExecutionPhase::Failed
                | ExecutionPhase::Timeout
                | ExecutionPhase::ResourceLimitExceeded
                | ExecutionPhase::Error
                | ExecutionPhase::Cancelled
        )
    }

    pub fn can_transition_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        match (self, next) {
            (Pending, Validating) => true,
            (Validating, Rejected) | (Validating, Preparing) => true,
            (Preparing, Running) | (Preparing, Error) | (Preparing, Cancelled) => true,
            // The fallback path re-validates right before it runs.
            (Running, Rejected) => true,
            (Running, n) => n.is_run_outcome(),
            (p, CleanedUp) => p.is_run_outcome() || p == Rejected,
            _ => false,
        }
    }
}

/// Ordered record of the phases a request went through.
#[derive(Debug, Clone)]
pub struct PhaseTrail {
    phases: Vec<ExecutionPhase>,
}

impl Default for PhaseTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTrail {
    pub fn new() -> Self {
        Self {
            phases: vec![ExecutionPhase::Pending],
        }
    }

    pub fn current(&self) -> ExecutionPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(ExecutionPhase::Pending)
    }

    pub fn advance(&mut self, next: ExecutionPhase) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(Error::internal(format!(
                "Illegal phase transition {:?} -> {:?}",
                current, next
            )));
        }
        self.phases.push(next);
        Ok(())
    }

    pub fn phases(&self) -> &[ExecutionPhase] {
        &self.phases
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.phases).unwrap_or_default()
    }
}
