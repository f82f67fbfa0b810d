//! Workspace files and the result envelope shared by every executor.

use serde::Deserialize;
use std::path::Path;

use codebox_core::{ExecutionContext, ExecutorResult, Result, TIMEOUT_EXIT_CODE};

use crate::executor::ExecutionMode;
use crate::languages::{LanguageProfile, ENVELOPE_FILE};

/// Result envelope written by the runners. Shell runners omit the streams.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub exit_code: i64,
    #[serde(default)]
    pub execution_time: Option<f64>,
}

/// Write the user's source and the runner into `dir`.
pub async fn write_workspace(
    dir: &Path,
    profile: &dyn LanguageProfile,
    code: &str,
    context: &ExecutionContext,
    mode: ExecutionMode,
) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(profile.source_file()), code).await?;
    tokio::fs::write(dir.join(profile.runner_file()), profile.runner_source(context)).await?;
    // A stale envelope must never be mistaken for this run's result.
    let _ = tokio::fs::remove_file(dir.join(ENVELOPE_FILE)).await;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(workspace_mode(mode)))
            .await?;
    }
    Ok(())
}

/// Container runs execute as an unprivileged uid that must be able to write
/// the envelope. Host runs write as the service user, so nobody else gets in.
fn workspace_mode(mode: ExecutionMode) -> u32 {
    match mode {
        ExecutionMode::Isolated => 0o777,
        ExecutionMode::Fallback => 0o700,
    }
}

/// Read and parse the envelope, if the runner got far enough to write one.
pub async fn read_envelope(dir: &Path) -> Option<ResultEnvelope> {
    let raw = tokio::fs::read_to_string(dir.join(ENVELOPE_FILE)).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Ignoring unparseable result envelope");
            None
        }
    }
}

/// Raw observations of one run, before the envelope is merged in.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub elapsed: f64,
}

/// Combine the raw run with the envelope; the envelope wins when present.
pub fn finalize(outcome: RunOutcome, envelope: Option<ResultEnvelope>) -> ExecutorResult {
    if outcome.timed_out {
        return ExecutorResult {
            output: outcome.stdout,
            error: Some(format!(
                "Execution timed out after {:.2}s",
                outcome.elapsed
            )),
            exit_code: TIMEOUT_EXIT_CODE,
            execution_time: outcome.elapsed,
            timed_out: true,
            ..Default::default()
        };
    }

    let (output, error, exit_code) = match envelope {
        Some(env) => (
            env.output.unwrap_or(outcome.stdout),
            env.error.or_else(|| non_empty(outcome.stderr)),
            env.exit_code,
        ),
        None => (outcome.stdout, non_empty(outcome.stderr), outcome.exit_code),
    };

    ExecutorResult {
        output,
        error: error.filter(|e| !e.trim().is_empty()),
        exit_code,
        execution_time: outcome.elapsed,
        timed_out: false,
        ..Default::default()
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::PythonProfile;
    use codebox_core::Language;

    fn context() -> ExecutionContext {
        ExecutionContext {
            language: Language::Python,
            timeout_secs: 5,
            memory_limit_mb: 128,
            cpu_limit: 1.0,
        }
    }

    #[tokio::test]
    async fn test_write_workspace_and_read_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("env-1");
        let profile = PythonProfile::new(vec!["math".into()]);

        write_workspace(&ws, &profile, "print(1)", &context(), ExecutionMode::Isolated)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.join("main.py")).unwrap(),
            "print(1)"
        );
        assert!(ws.join(".codebox_runner.py").exists());
        assert!(read_envelope(&ws).await.is_none());

        std::fs::write(
            ws.join(ENVELOPE_FILE),
            r#"{"output": "1\n", "error": null, "exit_code": 0, "execution_time": 0.01}"#,
        )
        .unwrap();
        let envelope = read_envelope(&ws).await.unwrap();
        assert_eq!(envelope.output.as_deref(), Some("1\n"));
        assert_eq!(envelope.exit_code, 0);

        std::fs::write(ws.join(ENVELOPE_FILE), "{not json").unwrap();
        assert!(read_envelope(&ws).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_workspace_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let profile = PythonProfile::new(vec![]);
        let mode_of = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

        let host = dir.path().join("host");
        write_workspace(&host, &profile, "print(1)", &context(), ExecutionMode::Fallback)
            .await
            .unwrap();
        assert_eq!(mode_of(&host), 0o700);

        let container = dir.path().join("container");
        write_workspace(&container, &profile, "print(1)", &context(), ExecutionMode::Isolated)
            .await
            .unwrap();
        assert_eq!(mode_of(&container), 0o777);
    }

    #[test]
    fn test_finalize_prefers_envelope() {
        let outcome = RunOutcome {
            stdout: "raw".into(),
            stderr: "raw err".into(),
            exit_code: 3,
            timed_out: false,
            elapsed: 0.5,
        };
        let envelope = ResultEnvelope {
            output: Some("clean".into()),
            error: None,
            exit_code: 0,
            execution_time: Some(0.1),
        };
        let result = finalize(outcome, Some(envelope));
        assert_eq!(result.output, "clean");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.error.as_deref(), Some("raw err"));
    }

    #[test]
    fn test_finalize_without_envelope_and_on_timeout() {
        let result = finalize(
            RunOutcome {
                stdout: "out".into(),
                exit_code: 2,
                elapsed: 0.2,
                ..Default::default()
            },
            None,
        );
        assert_eq!(result.output, "out");
        assert_eq!(result.exit_code, 2);
        assert!(result.error.is_none());

        let timed_out = finalize(
            RunOutcome {
                timed_out: true,
                elapsed: 1.0,
                ..Default::default()
            },
            None,
        );
        assert!(timed_out.timed_out);
        assert_eq!(timed_out.exit_code, TIMEOUT_EXIT_CODE);
    }
}
