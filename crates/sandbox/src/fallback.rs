//! Degraded executor used when the isolation runtime is unreachable.
//!
//! Runs the native interpreter on the host with the same runner and timeout
//! discipline as the container path. There is no filesystem or network
//! isolation, so the code is validated again right before it runs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use codebox_core::{
    Environment, EnvironmentId, Error, ExecutionContext, ExecutorResult, Language, Result,
};
use codebox_security::SecurityValidator;

use crate::executor::{ExecutionMode, Executor, RunOptions};
use crate::languages::LanguageProfile;
use crate::workspace::{self, RunOutcome};

const STDOUT_LOG: &str = ".codebox_stdout.log";
const STDERR_LOG: &str = ".codebox_stderr.log";

pub struct FallbackExecutor {
    profile: Arc<dyn LanguageProfile>,
    validator: Arc<SecurityValidator>,
    /// Process group of each environment's run; `None` once it has been reaped.
    groups: DashMap<EnvironmentId, Option<u32>>,
}

impl FallbackExecutor {
    pub fn new(profile: Arc<dyn LanguageProfile>, validator: Arc<SecurityValidator>) -> Self {
        Self {
            profile,
            validator,
            groups: DashMap::new(),
        }
    }

    /// Whether the interpreter this executor needs is on `PATH`.
    pub fn interpreter_available(&self) -> bool {
        let context = ExecutionContext {
            language: self.profile.language(),
            timeout_secs: 1,
            memory_limit_mb: 64,
            cpu_limit: 1.0,
        };
        let argv = self.profile.command(ExecutionMode::Fallback, ".", &context);
        argv.first().is_some_and(|program| find_in_path(program).is_some())
    }

    async fn run(
        &self,
        env: &Environment,
        code: &str,
        options: &mut RunOptions,
        start: Instant,
    ) -> Result<ExecutorResult> {
        self.validator.validate(code, self.profile.language().as_str())?;

        let context = options.context.clone();
        let dir = &env.working_directory;
        let workdir = dir.to_string_lossy().to_string();
        let argv = self.profile.command(ExecutionMode::Fallback, &workdir, &context);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::executor("Empty interpreter command"))?;

        // Streams go to files so stray descendants holding them open cannot
        // stall collection after the group is killed.
        let stdout_file = std::fs::File::create(dir.join(STDOUT_LOG))?;
        let stderr_file = std::fs::File::create(dir.join(STDERR_LOG))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(dir)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("HOME", dir)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true);
        for (key, value) in self.profile.env(&workdir, &context) {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            Error::executor(format!("Failed to start interpreter {}: {}", program, e))
        })?;
        let pid = child.id();
        if let Some(pid) = pid {
            // A dropped run leaves its group here for `cleanup` to kill.
            self.groups.insert(env.id.clone(), Some(pid));
            options.notify_started(pid);
        }

        tracing::info!(
            environment_id = %env.id,
            language = %self.profile.language(),
            pid = ?pid,
            "Fallback run started"
        );

        let (exit_code, timed_out) =
            match tokio::time::timeout(context.timeout(), child.wait()).await {
                Ok(Ok(status)) => (exit_code_of(status), false),
                Ok(Err(e)) => {
                    return Err(Error::executor(format!("Failed to wait for interpreter: {}", e)))
                }
                Err(_) => {
                    tracing::warn!(
                        environment_id = %env.id,
                        timeout_secs = context.timeout_secs,
                        "Fallback run timed out, killing process group"
                    );
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    let _ = child.kill().await;
                    (codebox_core::TIMEOUT_EXIT_CODE, true)
                }
            };

        // Reap anything the run left behind in its group.
        if let Some(pid) = pid {
            kill_process_group(pid);
            if let Some(mut group) = self.groups.get_mut(&env.id) {
                *group = None;
            }
        }

        let stdout = tokio::fs::read_to_string(dir.join(STDOUT_LOG))
            .await
            .unwrap_or_default();
        let stderr = tokio::fs::read_to_string(dir.join(STDERR_LOG))
            .await
            .unwrap_or_default();
        let envelope = if timed_out {
            None
        } else {
            workspace::read_envelope(dir).await
        };

        let mut result = workspace::finalize(
            RunOutcome {
                stdout,
                stderr,
                exit_code,
                timed_out,
                elapsed: start.elapsed().as_secs_f64(),
            },
            envelope,
        );
        result
            .metadata
            .insert("mode".into(), ExecutionMode::Fallback.as_str().into());
        result.metadata.insert("fallback_execution".into(), true.into());
        Ok(result)
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return code as i64;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as i64;
        }
    }
    -1
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        tracing::trace!(pgid, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

#[async_trait]
impl Executor for FallbackExecutor {
    fn language(&self) -> Language {
        self.profile.language()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Fallback
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
            ExecutionMode::Fallback,
        )
        .await
    }

    async fn execute(&self, env: &Environment, code: &str, mut options: RunOptions) -> ExecutorResult {
        let start = Instant::now();
        match self.run(env, code, &mut options, start).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(environment_id = %env.id, error = %e, "Fallback execution failed");
                let mut result =
                    ExecutorResult::failure(e.error_type(), e.to_string(), start.elapsed().as_secs_f64());
                result.metadata.insert("fallback_execution".into(), true.into());
                result
            }
        }
    }

    async fn cleanup(&self, env: &Environment) -> bool {
        match self.groups.remove(&env.id) {
            Some((_, Some(pgid))) => {
                tracing::warn!(
                    environment_id = %env.id,
                    pgid,
                    "Killing process group of an interrupted fallback run"
                );
                kill_process_group(pgid);
                true
            }
            Some((_, None)) => true,
            None => false,
        }
    }
}
