//! Executor abstraction and the container-backed executor.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};

use codebox_core::{
    Environment, Error, ExecutionContext, ExecutorResult, Language, Result,
};
use codebox_security::{ContainerSpec, SecurityValidator};

use crate::languages::{LanguageProfile, CONTAINER_WORKDIR};
use crate::runtime::{IsolationRuntime, WaitOutcome};
use crate::workspace::{self, RunOutcome};

// =============================================================================
// Executor Trait
// =============================================================================

/// How an executor isolates the code it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Inside a container of the isolation runtime.
    Isolated,
    /// Native interpreter on the host, no filesystem or network isolation.
    Fallback,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Isolated => "isolated",
            ExecutionMode::Fallback => "fallback",
        }
    }
}

/// Per-run inputs handed to [`Executor::execute`].
pub struct RunOptions {
    pub context: ExecutionContext,
    /// Receives the host pid of the run once it has started.
    pub on_start: Option<oneshot::Sender<u32>>,
}

impl RunOptions {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            on_start: None,
        }
    }

    pub fn with_pid_listener(mut self, tx: oneshot::Sender<u32>) -> Self {
        self.on_start = Some(tx);
        self
    }

    pub(crate) fn notify_started(&mut self, pid: u32) {
        if let Some(tx) = self.on_start.take() {
            let _ = tx.send(pid);
        }
    }
}

/// Runs validated code of one guest language.
///
/// Errors are converted into an [`ExecutorResult`] with `error_type` metadata
/// at this boundary; `execute` never fails.
#[async_trait]
pub trait Executor: Send + Sync {
    fn language(&self) -> Language;

    fn mode(&self) -> ExecutionMode;

    /// Write the source and runner into the environment's workspace.
    async fn prepare_workspace(
        &self,
        env: &Environment,
        code: &str,
        context: &ExecutionContext,
    ) -> Result<()>;

    async fn execute(&self, env: &Environment, code: &str, options: RunOptions) -> ExecutorResult;

    /// Release every run resource held for `env`. Idempotent, never fails.
    async fn cleanup(&self, env: &Environment) -> bool;
}

// =============================================================================
// Container Executor
// =============================================================================

/// Executes code in a fresh container per environment.
pub struct ContainerExecutor {
    profile: Arc<dyn LanguageProfile>,
    runtime: Arc<dyn IsolationRuntime>,
    validator: Arc<SecurityValidator>,
    image: String,
    /// Guards the one-time image build.
    image_ready: Mutex<bool>,
}

impl ContainerExecutor {
    pub fn new(
        profile: Arc<dyn LanguageProfile>,
        runtime: Arc<dyn IsolationRuntime>,
        validator: Arc<SecurityValidator>,
        image_prefix: &str,
    ) -> Self {
        let image = format!("{}-{}:latest", image_prefix, profile.image_suffix());
        Self {
            profile,
            runtime,
            validator,
            image,
            image_ready: Mutex::new(false),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Restricted run spec for an environment.
    pub fn container_spec(&self, env: &Environment, context: &ExecutionContext) -> ContainerSpec {
        let mut spec = ContainerSpec::new(env.container_name(), self.image.clone())
            .with_command(
                self.profile
                    .command(ExecutionMode::Isolated, CONTAINER_WORKDIR, context),
            )
            .with_working_dir(CONTAINER_WORKDIR)
            .with_bind(format!(
                "{}:{}:rw",
                env.working_directory.display(),
                CONTAINER_WORKDIR
            ))
            .with_label("codebox.environment", env.id.to_string());
        for (key, value) in self.profile.env(CONTAINER_WORKDIR, context) {
            spec = spec.with_env(&key, &value);
        }

        let mut spec = self.validator.apply_restrictions(spec, self.profile.language());
        // The resolved context is already clamped to the policy ceilings.
        spec.memory_bytes = Some((context.memory_limit_mb as i64).saturating_mul(1024 * 1024));
        spec.nano_cpus = Some((context.cpu_limit * 1_000_000_000.0) as i64);
        spec
    }

    /// Build the language image once if the runtime does not have it.
    async fn ensure_image(&self) -> Result<()> {
        let mut ready = self.image_ready.lock().await;
        if *ready {
            return Ok(());
        }
        if !self.runtime.image_exists(&self.image).await? {
            self.runtime
                .build_image(&self.image, self.profile.dockerfile())
                .await?;
        }
        *ready = true;
        Ok(())
    }

    async fn create_run(&self, spec: &ContainerSpec) -> Result<String> {
        match self.runtime.create(spec).await {
            Err(Error::ImageNotFound(image)) => {
                tracing::warn!(image = %image, "Sandbox image missing, building it");
                *self.image_ready.lock().await = false;
                self.ensure_image().await?;
                self.runtime.create(spec).await
            }
            other => other,
        }
    }

    async fn run(
        &self,
        env: &Environment,
        options: &mut RunOptions,
        start: Instant,
    ) -> Result<ExecutorResult> {
        let context = options.context.clone();
        let spec = self.container_spec(env, &context);
        let container_id = self.create_run(&spec).await?;
        self.runtime.start(&spec.name).await?;

        tracing::info!(
            environment_id = %env.id,
            container = %spec.name,
            language = %self.profile.language(),
            "Container started"
        );

        if let Ok(Some(pid)) = self.runtime.pid(&spec.name).await {
            options.notify_started(pid);
        }

        let outcome = self.runtime.wait(&spec.name, context.timeout()).await?;
        let (exit_code, timed_out) = match outcome {
            WaitOutcome::Exited(code) => (code, false),
            WaitOutcome::TimedOut => {
                tracing::warn!(container = %spec.name, timeout_secs = context.timeout_secs, "Run timed out");
                if let Err(e) = self.runtime.kill(&spec.name).await {
                    tracing::warn!(container = %spec.name, error = %e, "Failed to kill timed out run");
                }
                (codebox_core::TIMEOUT_EXIT_CODE, true)
            }
        };

        let logs = self.runtime.logs(&spec.name).await.unwrap_or_default();
        let oom_killed = self.runtime.oom_killed(&spec.name).await.unwrap_or(false);
        let envelope = if timed_out {
            None
        } else {
            workspace::read_envelope(&env.working_directory).await
        };

        let mut result = workspace::finalize(
            RunOutcome {
                stdout: logs.stdout,
                stderr: logs.stderr,
                exit_code,
                timed_out,
                elapsed: start.elapsed().as_secs_f64(),
            },
            envelope,
        );
        result.container_id = Some(container_id);
        result
            .metadata
            .insert("mode".into(), ExecutionMode::Isolated.as_str().into());
        if oom_killed {
            result.metadata.insert("oom_killed".into(), true.into());
        }
        Ok(result)
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    fn language(&self) -> Language {
        self.profile.language()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Isolated
    }

    async fn prepare_workspace(
        &self,
        env: &Environment,
        code: &str,
        context: &ExecutionContext,
    ) -> Result<()> {
        workspace::write_workspace(
            &env.working_directory,
            self.profile.as_ref(),
            code,
            context,
            ExecutionMode::Isolated,
        )
        .await
    }

    async fn execute(&self, env: &Environment, _code: &str, mut options: RunOptions) -> ExecutorResult {
        let start = Instant::now();
        match self.run(env, &mut options, start).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(environment_id = %env.id, error = %e, "Container execution failed");
                ExecutorResult::failure(e.error_type(), e.to_string(), start.elapsed().as_secs_f64())
            }
        }
    }

    async fn cleanup(&self, env: &Environment) -> bool {
        let name = env.container_name();
        if let Err(e) = self.runtime.kill(&name).await {
            tracing::warn!(container = %name, error = %e, "Failed to kill container during cleanup");
        }
        match self.runtime.remove(&name).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Failed to remove container during cleanup");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::profile_for;
    use crate::runtime::{MockRun, MockRuntime};
    use codebox_security::{SecurityPolicy, SANDBOX_USER};

    fn executor(runtime: Arc<MockRuntime>, language: Language) -> ContainerExecutor {
        let policy = SecurityPolicy::default();
        ContainerExecutor::new(
            profile_for(language, &policy),
            runtime,
            Arc::new(SecurityValidator::new(Arc::new(policy))),
            "codebox",
        )
    }

    fn context(language: Language, timeout_secs: u64) -> ExecutionContext {
        ExecutionContext {
            language,
            timeout_secs,
            memory_limit_mb: 128,
            cpu_limit: 0.5,
        }
    }

    #[test]
    fn test_container_spec_is_restricted() {
        let runtime = Arc::new(MockRuntime::default());
        let exec = executor(runtime, Language::Python);
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(Language::Python, dir.path());

        let spec = exec.container_spec(&env, &context(Language::Python, 5));
        assert_eq!(spec.name, format!("codebox-{}", env.id));
        assert_eq!(spec.image, "codebox-python:latest");
        assert_eq!(spec.user.as_deref(), Some(SANDBOX_USER));
        assert!(spec.network_disabled);
        assert_eq!(spec.memory_bytes, Some(128 * 1024 * 1024));
        assert_eq!(spec.nano_cpus, Some(500_000_000));
        assert!(spec.binds[0].ends_with(":/workspace:rw"));
    }

    #[tokio::test]
    async fn test_execute_collects_logs() {
        let runtime = Arc::new(MockRuntime::new(vec![MockRun::output("hi\n")]));
        let exec = executor(runtime.clone(), Language::Shell);
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(Language::Shell, dir.path());
        let ctx = context(Language::Shell, 5);

        exec.prepare_workspace(&env, "echo hi", &ctx).await.unwrap();
        let result = exec.execute(&env, "echo hi", RunOptions::new(ctx)).await;
        assert!(result.success(), "{:?}", result);
        assert_eq!(result.output, "hi\n");
        assert!(result.container_id.is_some());

        assert!(exec.cleanup(&env).await);
        assert!(!exec.cleanup(&env).await);
    }

    #[tokio::test]
    async fn test_missing_image_is_built_once() {
        let runtime = Arc::new(
            MockRuntime::default()
                .without_image("codebox-python:latest")
                .await,
        );
        let exec = executor(runtime.clone(), Language::Python);
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Language::Python, 5);

        for _ in 0..2 {
            let env = Environment::new(Language::Python, dir.path());
            exec.prepare_workspace(&env, "print(1)", &ctx).await.unwrap();
            let result = exec.execute(&env, "print(1)", RunOptions::new(ctx.clone())).await;
            assert_eq!(result.exit_code, 0);
            exec.cleanup(&env).await;
        }
        assert_eq!(runtime.build_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_kills_run() {
        let runtime = Arc::new(MockRuntime::new(vec![MockRun::sleeping(
            std::time::Duration::from_secs(30),
        )]));
        let exec = executor(runtime.clone(), Language::Python);
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(Language::Python, dir.path());

        let result = exec
            .execute(&env, "while True: pass", RunOptions::new(context(Language::Python, 1)))
            .await;
        assert!(result.timed_out);
        assert_eq!(result.exit_code, codebox_core::TIMEOUT_EXIT_CODE);
        assert!(exec.cleanup(&env).await);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_becomes_result() {
        let runtime = Arc::new(MockRuntime::unavailable());
        let exec = executor(runtime, Language::JavaScript);
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(Language::JavaScript, dir.path());

        let result = exec
            .execute(&env, "console.log(1)", RunOptions::new(context(Language::JavaScript, 1)))
            .await;
        assert!(!result.success());
        assert_eq!(result.error_type(), Some("InfrastructureError"));
    }
}
