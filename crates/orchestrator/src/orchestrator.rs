//! Request lifecycle: validate, allocate, run, classify, clean up, record.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, RwLock};

use codebox_core::{
    code_hash, Environment, EnvironmentId, Error, ExecutionContext, ExecutionRecord,
    ExecutionRequest, ExecutionResult, ExecutionStatistics, ExecutionStatus, ExecutorResult,
    Language, ResourceUsage, Result, SecurityResult, TIMEOUT_EXIT_CODE,
};
use codebox_sandbox::{Executor, RunOptions};

use crate::context::RuntimeContext;
use crate::history::ExecutionHistory;
use crate::phase::{ExecutionPhase, PhaseTrail};

/// An environment that has not been cleaned up yet.
struct ActiveEnvironment {
    env: Environment,
    executor: Arc<dyn Executor>,
}

/// How the run phase of a request ended.
enum RunEnd {
    Finished(ExecutorResult),
    /// The orchestrator-level deadline (timeout plus setup grace) passed.
    DeadlineExceeded(Duration),
    Cancelled,
    SetupFailed(Error),
}

/// Entry point for executing guest code.
pub struct ExecutionOrchestrator {
    runtime: Arc<RuntimeContext>,
    environments: DashMap<EnvironmentId, ActiveEnvironment>,
    /// Cancellation switches of in-flight requests, keyed by execution id.
    in_flight: DashMap<String, watch::Sender<bool>>,
    history: RwLock<ExecutionHistory>,
}

impl ExecutionOrchestrator {
    pub fn new(runtime: Arc<RuntimeContext>) -> Self {
        let capacity = runtime.config.sandbox.history_capacity;
        Self {
            runtime,
            environments: DashMap::new(),
            in_flight: DashMap::new(),
            history: RwLock::new(ExecutionHistory::new(capacity)),
        }
    }

    pub fn runtime(&self) -> &Arc<RuntimeContext> {
        &self.runtime
    }

    /// Execute a request under a fresh execution id.
    ///
    /// Only an unsupported language is returned as `Err`; every other
    /// outcome is reported through the result's status.
    pub async fn execute_code(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.execute_code_as(uuid::Uuid::new_v4().to_string(), request)
            .await
    }

    /// Execute a request under a caller-chosen execution id, which can be
    /// passed to [`cancel`](Self::cancel) while the request is in flight.
    pub async fn execute_code_as(
        &self,
        execution_id: String,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let language: Language = request.language.parse()?;

        let mut trail = PhaseTrail::new();
        trail.advance(ExecutionPhase::Validating)?;
        tracing::info!(execution_id = %execution_id, language = %language, "Execution requested");

        let security = self
            .runtime
            .validator
            .validate_language(&request.code, language);
        if !security.is_safe {
            trail.advance(ExecutionPhase::Rejected)?;
            return Ok(self
                .reject(execution_id, language, &request, security, trail, started)
                .await);
        }

        trail.advance(ExecutionPhase::Preparing)?;
        let context = self.resolve_context(language, &request);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if self.in_flight.insert(execution_id.clone(), cancel_tx).is_some() {
            tracing::warn!(execution_id = %execution_id, "Execution id already in flight");
        }

        let (env, run_end, usage) = self
            .run_request(&execution_id, &request, &context, &mut trail, cancel_rx)
            .await;
        self.in_flight.remove(&execution_id);

        let (status, mut result) = self.classify(&execution_id, language, &context, run_end, usage);
        let terminal = trail.advance(ExecutionPhase::terminal(status));
        if let Some(env) = &env {
            self.cleanup_environment(&env.id).await;
        }
        terminal?;
        trail.advance(ExecutionPhase::CleanedUp)?;

        let fallback = result
            .debug_info
            .as_ref()
            .and_then(|d| d.get("fallback_execution"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        result.execution_time = started.elapsed().as_secs_f64();
        if let Some(serde_json::Value::Object(debug)) = result.debug_info.as_mut() {
            debug.insert("phases".into(), trail.to_json());
            if let Some(env) = &env {
                debug.insert("environment_id".into(), env.id.to_string().into());
            }
            debug.insert("request_metadata".into(), metadata_json(&request));
        }

        tracing::info!(
            execution_id = %execution_id,
            language = %language,
            status = status.as_str(),
            execution_time = result.execution_time,
            "Execution finished"
        );
        self.record(language, &request.code, Some(context), result.clone(), fallback)
            .await;
        Ok(result)
    }

    async fn reject(
        &self,
        execution_id: String,
        language: Language,
        request: &ExecutionRequest,
        security: SecurityResult,
        trail: PhaseTrail,
        started: Instant,
    ) -> ExecutionResult {
        tracing::warn!(
            execution_id = %execution_id,
            language = %language,
            risk_level = security.risk_level.as_str(),
            violations = security.violations.len(),
            "Execution rejected by security validation"
        );
        codebox_telemetry::record_security_rejection(language.as_str(), security.risk_level.as_str());

        let result = ExecutionResult {
            execution_id,
            status: ExecutionStatus::SecurityViolation,
            language: language.as_str().to_string(),
            execution_time: started.elapsed().as_secs_f64(),
            success: false,
            exit_code: None,
            output: None,
            error: Some(security.summary()),
            error_type: Some("SecurityViolation".into()),
            resource_usage: None,
            debug_info: Some(serde_json::json!({
                "phases": trail.to_json(),
                "security": security,
                "request_metadata": metadata_json(request),
            })),
        };
        self.record(language, &request.code, None, result.clone(), false)
            .await;
        result
    }

    /// Timeout and memory from policy defaults and caller overrides, clamped
    /// to the policy ceilings.
    fn resolve_context(&self, language: Language, request: &ExecutionRequest) -> ExecutionContext {
        let limits = self.runtime.policy.limits(language);
        let timeout_secs = request
            .timeout
            .unwrap_or(limits.default_timeout_secs)
            .clamp(1, limits.max_timeout_secs.max(1));
        let memory_limit_mb = request
            .memory_limit_mb
            .map_or(limits.memory_mb, |mb| mb.min(limits.memory_mb))
            .max(16);
        ExecutionContext {
            language,
            timeout_secs,
            memory_limit_mb,
            cpu_limit: limits.cpu_cores,
        }
    }

    /// Allocate an environment, prepare and run it. The environment is
    /// returned whenever one was allocated so the caller can clean it up.
    async fn run_request(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
        context: &ExecutionContext,
        trail: &mut PhaseTrail,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> (Option<Environment>, RunEnd, Option<ResourceUsage>) {
        let env = match self.create_environment(context.language).await {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(execution_id = %execution_id, error = %e, "Environment allocation failed");
                return (None, RunEnd::SetupFailed(e), None);
            }
        };
        let executor = match self.runtime.executor(context.language) {
            Ok(executor) => executor,
            Err(e) => return (Some(env), RunEnd::SetupFailed(e), None),
        };

        if let Err(e) = executor
            .prepare_workspace(&env, &request.code, context)
            .await
        {
            tracing::error!(execution_id = %execution_id, environment_id = %env.id, error = %e, "Workspace preparation failed");
            return (Some(env), RunEnd::SetupFailed(e), None);
        }
        if *cancel_rx.borrow() {
            return (Some(env), RunEnd::Cancelled, None);
        }
        if let Err(e) = trail.advance(ExecutionPhase::Running) {
            return (Some(env), RunEnd::SetupFailed(e), None);
        }

        let (pid_tx, pid_rx) = oneshot::channel::<u32>();
        let monitor = self.runtime.monitor.clone();
        let session = execution_id.to_string();
        let watcher = tokio::spawn(async move {
            if let Ok(pid) = pid_rx.await {
                monitor.start_monitoring(pid, &session);
            }
        });

        let grace = Duration::from_secs(self.runtime.config.sandbox.setup_grace_secs);
        let deadline = context.timeout() + grace;
        let options = RunOptions::new(context.clone()).with_pid_listener(pid_tx);
        let run = tokio::time::timeout(deadline, executor.execute(&env, &request.code, options));

        let end = tokio::select! {
            finished = run => match finished {
                Ok(result) => RunEnd::Finished(result),
                Err(_) => RunEnd::DeadlineExceeded(deadline),
            },
            Ok(_) = cancel_rx.wait_for(|cancelled| *cancelled) => RunEnd::Cancelled,
        };

        watcher.abort();
        let _ = watcher.await;
        let usage = self.runtime.monitor.stop_monitoring(execution_id);
        (Some(env), end, usage)
    }

    fn classify(
        &self,
        execution_id: &str,
        language: Language,
        context: &ExecutionContext,
        end: RunEnd,
        usage: Option<ResourceUsage>,
    ) -> (ExecutionStatus, ExecutionResult) {
        let mut result = ExecutionResult {
            execution_id: execution_id.to_string(),
            status: ExecutionStatus::Error,
            language: language.as_str().to_string(),
            execution_time: 0.0,
            success: false,
            exit_code: None,
            output: None,
            error: None,
            error_type: None,
            resource_usage: None,
            debug_info: None,
        };
        let mut debug = serde_json::Map::new();
        debug.insert(
            "context".into(),
            serde_json::to_value(context).unwrap_or_default(),
        );
        debug.insert("fallback_mode".into(), self.runtime.is_fallback_mode().into());

        let (status, error_type, error) = match end {
            RunEnd::Finished(raw) => {
                let breach = usage.as_ref().filter(|u| u.limit_exceeded);
                let (status, error_type) = if raw.timed_out || raw.exit_code == TIMEOUT_EXIT_CODE {
                    (ExecutionStatus::Timeout, Some("TimeoutExceeded".to_string()))
                } else if raw.oom_killed() || breach.is_some() {
                    (
                        ExecutionStatus::ResourceLimitExceeded,
                        Some("ResourceLimitBreach".to_string()),
                    )
                } else if let Some(kind) = raw.error_type() {
                    let status = if kind == "SecurityViolation" {
                        ExecutionStatus::SecurityViolation
                    } else {
                        ExecutionStatus::Error
                    };
                    (status, Some(kind.to_string()))
                } else if raw.exit_code != 0 {
                    (ExecutionStatus::Failed, Some("RuntimeError".to_string()))
                } else {
                    (ExecutionStatus::Completed, None)
                };

                let error = match status {
                    ExecutionStatus::Completed => raw.error.clone().filter(|e| !e.is_empty()),
                    ExecutionStatus::Timeout => Some(non_empty(
                        raw.error.clone(),
                        format!("Execution timed out after {}s", context.timeout_secs),
                    )),
                    ExecutionStatus::ResourceLimitExceeded => Some(match breach.and_then(|u| u.breach.as_ref()) {
                        Some(b) => format!("Resource limit exceeded: {}", b),
                        None => non_empty(
                            raw.error.clone(),
                            format!("Run was killed after exceeding its {} MB memory limit", context.memory_limit_mb),
                        ),
                    }),
                    _ => Some(non_empty(
                        raw.error.clone(),
                        format!("Process exited with code {}", raw.exit_code),
                    )),
                };

                result.exit_code = Some(raw.exit_code);
                result.output = Some(raw.output.clone());
                debug.insert("fallback_execution".into(), raw.is_fallback().into());
                if let Some(id) = &raw.container_id {
                    debug.insert("container_id".into(), id.clone().into());
                }
                debug.insert("executor".into(), serde_json::Value::Object(raw.metadata));
                (status, error_type, error)
            }
            RunEnd::DeadlineExceeded(deadline) => {
                tracing::warn!(execution_id = %execution_id, deadline_secs = deadline.as_secs(), "Execution deadline exceeded");
                result.exit_code = Some(TIMEOUT_EXIT_CODE);
                (
                    ExecutionStatus::Timeout,
                    Some("TimeoutExceeded".to_string()),
                    Some(format!(
                        "Execution exceeded its {}s deadline including setup",
                        deadline.as_secs()
                    )),
                )
            }
            RunEnd::Cancelled => {
                tracing::info!(execution_id = %execution_id, "Execution cancelled");
                (
                    ExecutionStatus::Cancelled,
                    Some("Cancelled".to_string()),
                    Some("Execution cancelled".to_string()),
                )
            }
            RunEnd::SetupFailed(e) => (
                ExecutionStatus::Error,
                Some(e.error_type().to_string()),
                Some(e.to_string()),
            ),
        };

        result.status = status;
        result.success = status == ExecutionStatus::Completed;
        result.error = error;
        result.error_type = error_type;
        result.resource_usage = usage;
        result.debug_info = Some(serde_json::Value::Object(debug));
        (status, result)
    }

    async fn record(
        &self,
        language: Language,
        code: &str,
        context: Option<ExecutionContext>,
        result: ExecutionResult,
        fallback: bool,
    ) {
        codebox_telemetry::record_execution(
            language.as_str(),
            result.status.as_str(),
            result.execution_time,
        );
        let record = ExecutionRecord {
            execution_id: result.execution_id.clone(),
            language,
            timestamp: Utc::now(),
            code_hash: code_hash(code),
            context,
            result,
        };
        self.history.write().await.push(record, fallback);
    }

    // =========================================================================
    // Environments
    // =========================================================================

    /// Allocate and register a new environment with an empty workspace.
    pub async fn create_environment(&self, language: Language) -> Result<Environment> {
        let env = Environment::new(language, &self.runtime.config.sandbox.workspace_root);
        let executor = self.runtime.executor(language)?;

        match self.environments.entry(env.id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::internal(format!(
                    "Environment id {} reused before cleanup",
                    env.id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveEnvironment {
                    env: env.clone(),
                    executor,
                });
            }
        }
        codebox_telemetry::set_active_environments(self.environments.len());

        if let Err(e) = tokio::fs::create_dir_all(&env.working_directory).await {
            self.environments.remove(&env.id);
            return Err(e.into());
        }
        tracing::debug!(environment_id = %env.id, language = %language, "Environment created");
        Ok(env)
    }

    /// Tear down an environment: executor run resources, then the workspace.
    /// Returns false when the environment is unknown or already cleaned up.
    pub async fn cleanup_environment(&self, id: &EnvironmentId) -> bool {
        let Some((_, active)) = self.environments.remove(id) else {
            return false;
        };
        codebox_telemetry::set_active_environments(self.environments.len());

        if !active.executor.cleanup(&active.env).await {
            tracing::debug!(environment_id = %id, "No run resources to release");
        }
        match tokio::fs::remove_dir_all(&active.env.working_directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(environment_id = %id, error = %e, "Failed to remove workspace");
            }
        }
        tracing::debug!(environment_id = %id, "Environment cleaned up");
        true
    }

    pub fn active_environments(&self) -> usize {
        self.environments.len()
    }

    // =========================================================================
    // Queries and control
    // =========================================================================

    pub async fn get_statistics(&self) -> ExecutionStatistics {
        self.history
            .read()
            .await
            .statistics(self.environments.len())
    }

    /// Recorded executions, newest first.
    pub async fn get_execution_history(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        self.history.read().await.recent(limit)
    }

    /// Reset history and counters.
    pub async fn clear_execution_history(&self) {
        self.history.write().await.clear();
        tracing::info!("Execution history cleared");
    }

    /// Request cancellation of an in-flight execution.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.in_flight.get(execution_id) {
            Some(switch) => {
                switch.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn is_fallback_mode(&self) -> bool {
        self.runtime.is_fallback_mode()
    }

    /// Cancel in-flight requests, clean every remaining environment and stop
    /// all monitoring.
    pub async fn shutdown(&self) {
        for switch in self.in_flight.iter() {
            switch.send_replace(true);
        }
        let ids: Vec<EnvironmentId> = self.environments.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.cleanup_environment(id).await;
        }
        self.runtime.shutdown();
        tracing::info!(cleaned = ids.len(), "Orchestrator shut down");
    }
}

fn non_empty(message: Option<String>, default: String) -> String {
    message.filter(|m| !m.trim().is_empty()).unwrap_or(default)
}

fn metadata_json(request: &ExecutionRequest) -> serde_json::Value {
    serde_json::to_value(&request.metadata).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::config::AppConfig;
    use codebox_sandbox::{MockRun, MockRuntime};

    async fn orchestrator(runs: Vec<MockRun>) -> (ExecutionOrchestrator, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.sandbox.workspace_root = root.path().to_path_buf();
        let context = RuntimeContext::builder(config)
            .with_runtime(Arc::new(MockRuntime::new(runs)))
            .build()
            .await
            .unwrap();
        (ExecutionOrchestrator::new(Arc::new(context)), root)
    }

    #[tokio::test]
    async fn test_context_is_clamped() {
        let (orch, _root) = orchestrator(vec![]).await;
        let request = ExecutionRequest::new("python", "print(1)")
            .with_timeout(100_000)
            .with_memory_limit(100_000);
        let ctx = orch.resolve_context(Language::Python, &request);
        let limits = orch.runtime.policy.limits(Language::Python);
        assert_eq!(ctx.timeout_secs, limits.max_timeout_secs);
        assert_eq!(ctx.memory_limit_mb, limits.memory_mb);

        let ctx = orch.resolve_context(Language::Python, &ExecutionRequest::new("python", "x").with_timeout(0));
        assert_eq!(ctx.timeout_secs, 1);

        let ctx = orch.resolve_context(Language::Shell, &ExecutionRequest::new("sh", "x"));
        assert_eq!(ctx.timeout_secs, orch.runtime.policy.limits(Language::Shell).default_timeout_secs);
    }

    #[tokio::test]
    async fn test_oom_kill_is_resource_limit() {
        let run = MockRun {
            exit_code: 137,
            oom_killed: true,
            ..MockRun::default()
        };
        let (orch, _root) = orchestrator(vec![run]).await;
        let result = orch
            .execute_code(ExecutionRequest::new("python", "x = [0] * 10**9"))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded);
        assert_eq!(result.error_type.as_deref(), Some("ResourceLimitBreach"));
        assert!(result.error.unwrap().contains("memory limit"));
    }

    #[tokio::test]
    async fn test_monitor_breach_overrides_clean_exit() {
        let (orch, _root) = orchestrator(vec![]).await;
        let usage = ResourceUsage {
            memory_mb: 900.0,
            limit_exceeded: true,
            breach: Some(codebox_core::LimitBreach::Memory {
                used_mb: 900.0,
                limit_mb: 512.0,
            }),
            ..Default::default()
        };
        let ctx = orch.resolve_context(Language::Python, &ExecutionRequest::new("python", "x"));
        let (status, result) = orch.classify(
            "exec",
            Language::Python,
            &ctx,
            RunEnd::Finished(ExecutorResult::default()),
            Some(usage),
        );
        assert_eq!(status, ExecutionStatus::ResourceLimitExceeded);
        assert!(result.error.unwrap().contains("memory 900.0 MB"));
    }

    #[tokio::test]
    async fn test_infrastructure_failure_is_error() {
        let (orch, _root) = orchestrator(vec![]).await;
        let ctx = orch.resolve_context(Language::Shell, &ExecutionRequest::new("shell", "echo"));
        let raw = ExecutorResult::failure("InfrastructureError", "daemon went away", 0.1);
        let (status, result) = orch.classify("exec", Language::Shell, &ctx, RunEnd::Finished(raw), None);
        assert_eq!(status, ExecutionStatus::Error);
        assert_eq!(result.error_type.as_deref(), Some("InfrastructureError"));
        assert_eq!(result.error.as_deref(), Some("daemon went away"));
    }
}
