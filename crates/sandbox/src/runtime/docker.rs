//! Docker runtime using the `bollard` crate.

use async_trait::async_trait;
use futures::StreamExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use codebox_core::{Error, Result};
use codebox_security::ContainerSpec;

use super::{IsolationRuntime, RunLogs, WaitOutcome};

/// Docker-backed isolation runtime.
///
/// Every container is created from a [`ContainerSpec`] that has already been
/// through `apply_restrictions`; this type only translates it to the Docker API.
pub struct DockerRuntime {
    docker: bollard::Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::infrastructure(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Create from an existing bollard Docker client (for testing).
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }

    async fn inspect_state(&self, name: &str) -> Result<Option<bollard::models::ContainerState>> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(|e| Error::infrastructure(format!("Failed to inspect container {}: {}", name, e)))?;
        Ok(inspect.state)
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_running(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

#[async_trait]
impl IsolationRuntime for DockerRuntime {
    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::infrastructure(format!(
                "Failed to inspect image {}: {}",
                image, e
            ))),
        }
    }

    async fn build_image(&self, image: &str, dockerfile: &str) -> Result<()> {
        tracing::info!(image = %image, "Building sandbox image");

        // Build context is empty; the Dockerfile arrives on stdin.
        let mut child = tokio::process::Command::new("docker")
            .args(["build", "-t", image, "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::infrastructure(format!("Failed to run docker build: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(dockerfile.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(Error::infrastructure(format!(
                "Image build failed for {}: {}",
                image, tail
            )));
        }

        tracing::info!(image = %image, "Sandbox image built");
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::HostConfig;

        let host_config = HostConfig {
            memory: spec.memory_bytes,
            // No swap beyond the memory ceiling.
            memory_swap: spec.memory_bytes,
            nano_cpus: spec.nano_cpus,
            network_mode: spec.network_disabled.then(|| "none".to_string()),
            readonly_rootfs: Some(spec.read_only_root),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            tmpfs: (!spec.tmpfs.is_empty()).then(|| spec.tmpfs.clone()),
            cap_drop: (!spec.cap_drop.is_empty()).then(|| spec.cap_drop.clone()),
            security_opt: (!spec.security_opt.is_empty()).then(|| spec.security_opt.clone()),
            pids_limit: spec.pids_limit,
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            network_disabled: Some(spec.network_disabled),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(response) => {
                tracing::debug!(container = %spec.name, image = %spec.image, "Container created");
                Ok(response.id)
            }
            Err(e) if is_not_found(&e) => Err(Error::ImageNotFound(spec.image.clone())),
            Err(e) => Err(Error::infrastructure(format!(
                "Failed to create container {}: {}",
                spec.name, e
            ))),
        }
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.docker
            .start_container::<String>(name, None)
            .await
            .map_err(|e| Error::infrastructure(format!("Failed to start container {}: {}", name, e)))
    }

    async fn wait(&self, name: &str, timeout: Duration) -> Result<WaitOutcome> {
        use bollard::container::WaitContainerOptions;

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(name, Some(options));

        match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => Ok(WaitOutcome::TimedOut),
            Ok(Some(Ok(response))) => Ok(WaitOutcome::Exited(response.status_code)),
            // bollard reports non-zero exits as an error carrying the code.
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                Ok(WaitOutcome::Exited(code))
            }
            Ok(Some(Err(e))) => Err(Error::infrastructure(format!(
                "Failed to wait for container {}: {}",
                name, e
            ))),
            Ok(None) => Err(Error::infrastructure(format!(
                "Wait stream for container {} ended without a status",
                name
            ))),
        }
    }

    async fn logs(&self, name: &str) -> Result<RunLogs> {
        use bollard::container::{LogOutput, LogsOptions};

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut logs = RunLogs::default();
        let mut stream = self.docker.logs(name, Some(options));
        while let Some(item) = stream.next().await {
            match item {
                Ok(LogOutput::StdOut { message }) => {
                    logs.stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    logs.stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::infrastructure(format!(
                        "Failed to read logs of container {}: {}",
                        name, e
                    )));
                }
            }
        }
        Ok(logs)
    }

    async fn pid(&self, name: &str) -> Result<Option<u32>> {
        let state = self.inspect_state(name).await?;
        Ok(state
            .and_then(|s| s.pid)
            .filter(|&pid| pid > 0)
            .and_then(|pid| u32::try_from(pid).ok()))
    }

    async fn oom_killed(&self, name: &str) -> Result<bool> {
        let state = self.inspect_state(name).await?;
        Ok(state.and_then(|s| s.oom_killed).unwrap_or(false))
    }

    async fn kill(&self, name: &str) -> Result<()> {
        use bollard::container::KillContainerOptions;

        match self
            .docker
            .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_running(&e) => Ok(()),
            Err(e) => Err(Error::infrastructure(format!(
                "Failed to kill container {}: {}",
                name, e
            ))),
        }
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        use bollard::container::RemoveContainerOptions;

        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                tracing::debug!(container = %name, "Container removed");
                Ok(true)
            }
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::infrastructure(format!(
                "Failed to remove container {}: {}",
                name, e
            ))),
        }
    }
}
