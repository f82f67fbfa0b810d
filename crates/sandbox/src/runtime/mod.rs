//! Isolation runtime client.
//!
//! The [`IsolationRuntime`] trait is the seam between executors and the
//! container engine. [`DockerRuntime`] talks to a Docker daemon through
//! `bollard`; [`MockRuntime`] replays scripted runs for tests.

use async_trait::async_trait;
use std::time::Duration;

use codebox_core::Result;
use codebox_security::ContainerSpec;

pub mod docker;
pub mod mock;

pub use docker::DockerRuntime;
pub use mock::{MockRun, MockRuntime};

/// How a wait on a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i64),
    TimedOut,
}

/// Captured output streams of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Operations executors need from a container engine.
///
/// Runs are addressed by container name.
#[async_trait]
pub trait IsolationRuntime: Send + Sync {
    /// Whether the engine is reachable.
    async fn is_available(&self) -> bool;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build `image` from a Dockerfile.
    async fn build_image(&self, image: &str, dockerfile: &str) -> Result<()>;

    /// Create a run. Fails with `Error::ImageNotFound` when the image is missing.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, name: &str) -> Result<()>;

    /// Wait for the run to exit, giving up after `timeout`.
    async fn wait(&self, name: &str, timeout: Duration) -> Result<WaitOutcome>;

    async fn logs(&self, name: &str) -> Result<RunLogs>;

    /// Host pid of the run's main process, when visible.
    async fn pid(&self, name: &str) -> Result<Option<u32>>;

    async fn oom_killed(&self, name: &str) -> Result<bool>;

    /// Force-stop a run. Stopping a run that is not running is not an error.
    async fn kill(&self, name: &str) -> Result<()>;

    /// Remove a run; returns false when it did not exist.
    async fn remove(&self, name: &str) -> Result<bool>;
}
