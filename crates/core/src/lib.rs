//! Core types, configuration, and error definitions for Codebox.
//!
//! This crate provides the foundational building blocks shared by the
//! security validator, the executors, the resource monitor and the
//! orchestrator.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
