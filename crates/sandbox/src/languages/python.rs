use codebox_core::{ExecutionContext, Language};

use super::{runner_path, LanguageProfile};
use crate::executor::ExecutionMode;

const RUNNER: &str = include_str!("../../runners/runner.py");

const DOCKERFILE: &str = "\
FROM python:3.11-slim
RUN pip install --no-cache-dir numpy pandas
ENV PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1
WORKDIR /workspace
";

/// Python runs under a restricted-builtins runner with a guarded `__import__`.
pub struct PythonProfile {
    allowed_modules: Vec<String>,
}

impl PythonProfile {
    pub fn new(allowed_modules: Vec<String>) -> Self {
        Self { allowed_modules }
    }
}

impl LanguageProfile for PythonProfile {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_file(&self) -> &'static str {
        "main.py"
    }

    fn runner_file(&self) -> &'static str {
        ".codebox_runner.py"
    }

    fn runner_source(&self, _context: &ExecutionContext) -> String {
        // Module names never contain quotes, so the JSON list embeds safely in
        // a single-quoted Python literal.
        let modules = serde_json::to_string(&self.allowed_modules).unwrap_or_else(|_| "[]".into());
        RUNNER.replace("__ALLOWED_MODULES__", &modules)
    }

    fn dockerfile(&self) -> &'static str {
        DOCKERFILE
    }

    fn command(&self, _mode: ExecutionMode, workdir: &str, _context: &ExecutionContext) -> Vec<String> {
        vec![
            "python3".into(),
            "-I".into(),
            "-B".into(),
            runner_path(workdir, self.runner_file()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext {
            language: Language::Python,
            timeout_secs: 5,
            memory_limit_mb: 128,
            cpu_limit: 1.0,
        }
    }

    #[test]
    fn test_runner_embeds_allowed_modules() {
        let profile = PythonProfile::new(vec!["math".into(), "json".into()]);
        let runner = profile.runner_source(&context());
        assert!(runner.contains(r#"json.loads('["math","json"]')"#));
        assert!(!runner.contains("__ALLOWED_MODULES__"));
    }

    #[test]
    fn test_command_runs_isolated_interpreter() {
        let profile = PythonProfile::new(vec![]);
        let cmd = profile.command(ExecutionMode::Isolated, "/workspace", &context());
        assert_eq!(cmd[0], "python3");
        assert_eq!(cmd.last().unwrap(), "/workspace/.codebox_runner.py");
    }
}
