//! Isolated execution of validated guest code.
//!
//! Each guest language has a [`LanguageProfile`] describing its runner and
//! image. Executors turn a profile into runs:
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  ExecutionOrchestrator                 │
//! │    ↓ Executor::execute                 │
//! ├────────────────────────────────────────┤
//! │  ContainerExecutor  │ FallbackExecutor │
//! │    ↓ IsolationRuntime  ↓ native interp │
//! ├────────────────────────────────────────┤
//! │  Container (DockerRuntime / bollard)   │
//! │    /workspace  (bind mount, rw)        │
//! │    No network, no root, no caps        │
//! └────────────────────────────────────────┘
//! ```
//!
//! The fallback path is only installed when the isolation runtime cannot be
//! reached at startup.

pub mod executor;
pub mod fallback;
pub mod languages;
pub mod runtime;
pub mod workspace;

pub use executor::{ContainerExecutor, ExecutionMode, Executor, RunOptions};
pub use fallback::FallbackExecutor;
pub use languages::{profile_for, LanguageProfile, ENVELOPE_FILE};
pub use runtime::{DockerRuntime, IsolationRuntime, MockRun, MockRuntime, RunLogs, WaitOutcome};
