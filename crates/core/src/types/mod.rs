//! Core type definitions for Codebox.
//!
//! Broken down into submodules by concern: guest languages, static analysis
//! results, per-execution environments and execution results.

pub mod environment;
pub mod execution;
pub mod language;
pub mod security;

pub use environment::*;
pub use execution::*;
pub use language::*;
pub use security::*;
