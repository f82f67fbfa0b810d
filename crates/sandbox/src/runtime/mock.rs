//! Scripted runtime for tests that must not depend on a container engine.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use codebox_core::{Error, Result};
use codebox_security::ContainerSpec;

use super::{IsolationRuntime, RunLogs, WaitOutcome};

/// Scripted outcome of one run.
#[derive(Debug, Clone)]
pub struct MockRun {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Simulated run duration.
    pub duration: Duration,
    pub oom_killed: bool,
}

impl Default for MockRun {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout: "[mock] run completed\n".to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(10),
            oom_killed: false,
        }
    }
}

impl MockRun {
    pub fn output(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failing(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn sleeping(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }
}

struct MockContainer {
    run: MockRun,
    killed: bool,
}

/// In-memory runtime replaying scripted runs in creation order.
pub struct MockRuntime {
    available: bool,
    images: Mutex<HashSet<String>>,
    runs: Mutex<VecDeque<MockRun>>,
    containers: DashMap<String, MockContainer>,
    /// Every spec passed to `create`, in order.
    pub created: Arc<Mutex<Vec<ContainerSpec>>>,
    builds: AtomicUsize,
    removals: AtomicUsize,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockRuntime {
    /// Available runtime where every image already exists.
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            available: true,
            images: Mutex::new(HashSet::new()),
            runs: Mutex::new(runs.into()),
            containers: DashMap::new(),
            created: Arc::new(Mutex::new(Vec::new())),
            builds: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
        }
    }

    /// Runtime whose engine cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    /// Mark `image` as missing until it is built.
    pub async fn without_image(self, image: &str) -> Self {
        self.images.lock().await.insert(format!("!{}", image));
        self
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub fn live_containers(&self) -> usize {
        self.containers.len()
    }

    async fn has_image(&self, image: &str) -> bool {
        let images = self.images.lock().await;
        images.contains(image) || !images.contains(&format!("!{}", image))
    }
}

#[async_trait]
impl IsolationRuntime for MockRuntime {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.has_image(image).await)
    }

    async fn build_image(&self, image: &str, _dockerfile: &str) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let mut images = self.images.lock().await;
        images.remove(&format!("!{}", image));
        images.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if !self.available {
            return Err(Error::infrastructure("mock runtime unavailable"));
        }
        if !self.has_image(&spec.image).await {
            return Err(Error::ImageNotFound(spec.image.clone()));
        }
        if self.containers.contains_key(&spec.name) {
            return Err(Error::infrastructure(format!(
                "Conflict: container name {} already in use",
                spec.name
            )));
        }

        let run = self.runs.lock().await.pop_front().unwrap_or_default();
        self.containers.insert(
            spec.name.clone(),
            MockContainer { run, killed: false },
        );
        self.created.lock().await.push(spec.clone());
        Ok(format!("mock-{}", spec.name))
    }

    async fn start(&self, name: &str) -> Result<()> {
        if self.containers.contains_key(name) {
            Ok(())
        } else {
            Err(Error::infrastructure(format!("No such container: {}", name)))
        }
    }

    async fn wait(&self, name: &str, timeout: Duration) -> Result<WaitOutcome> {
        let (duration, exit_code) = match self.containers.get(name) {
            Some(c) => (c.run.duration, c.run.exit_code),
            None => return Err(Error::infrastructure(format!("No such container: {}", name))),
        };
        if duration > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(WaitOutcome::TimedOut);
        }
        tokio::time::sleep(duration).await;
        let killed = self.containers.get(name).map(|c| c.killed).unwrap_or(true);
        Ok(WaitOutcome::Exited(if killed { 137 } else { exit_code }))
    }

    async fn logs(&self, name: &str) -> Result<RunLogs> {
        self.containers
            .get(name)
            .map(|c| RunLogs {
                stdout: c.run.stdout.clone(),
                stderr: c.run.stderr.clone(),
            })
            .ok_or_else(|| Error::infrastructure(format!("No such container: {}", name)))
    }

    async fn pid(&self, _name: &str) -> Result<Option<u32>> {
        Ok(None)
    }

    async fn oom_killed(&self, name: &str) -> Result<bool> {
        Ok(self
            .containers
            .get(name)
            .map(|c| c.run.oom_killed)
            .unwrap_or(false))
    }

    async fn kill(&self, name: &str) -> Result<()> {
        if let Some(mut c) = self.containers.get_mut(name) {
            c.killed = true;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let removed = self.containers.remove(name).is_some();
        if removed {
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec::new(name, "codebox-python:latest")
    }

    #[tokio::test]
    async fn test_mock_runtime_lifecycle() {
        let runtime = MockRuntime::new(vec![MockRun::output("Hello Sandbox\n")]);

        runtime.create(&spec("codebox-a")).await.unwrap();
        runtime.start("codebox-a").await.unwrap();
        let outcome = runtime
            .wait("codebox-a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Exited(0));
        assert_eq!(runtime.logs("codebox-a").await.unwrap().stdout, "Hello Sandbox\n");

        assert!(runtime.remove("codebox-a").await.unwrap());
        assert!(!runtime.remove("codebox-a").await.unwrap());
        assert_eq!(runtime.removal_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_runtime_name_conflict() {
        let runtime = MockRuntime::default();
        runtime.create(&spec("codebox-dup")).await.unwrap();
        let err = runtime.create(&spec("codebox-dup")).await.unwrap_err();
        assert!(matches!(err, Error::Infrastructure(_)));
    }

    #[tokio::test]
    async fn test_mock_runtime_missing_image_until_built() {
        let runtime = MockRuntime::default()
            .without_image("codebox-python:latest")
            .await;
        let err = runtime.create(&spec("codebox-b")).await.unwrap_err();
        assert!(matches!(err, Error::ImageNotFound(_)));

        runtime
            .build_image("codebox-python:latest", "FROM scratch")
            .await
            .unwrap();
        assert!(runtime.create(&spec("codebox-b")).await.is_ok());
        assert_eq!(runtime.build_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_runtime_timeout() {
        let runtime = MockRuntime::new(vec![MockRun::sleeping(Duration::from_secs(30))]);
        runtime.create(&spec("codebox-slow")).await.unwrap();
        let outcome = runtime
            .wait("codebox-slow", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
