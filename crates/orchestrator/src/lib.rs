//! Execution orchestration for Codebox.
//!
//! The [`ExecutionOrchestrator`] gates every request through the security
//! validator, gives it a private environment, dispatches it to the
//! language's executor while the resource monitor samples the run, and
//! records the outcome.

pub mod context;
pub mod history;
pub mod orchestrator;
pub mod phase;

pub use context::{RuntimeBuilder, RuntimeContext};
pub use history::ExecutionHistory;
pub use orchestrator::ExecutionOrchestrator;
pub use phase::{ExecutionPhase, PhaseTrail};
