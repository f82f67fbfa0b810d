use codebox_core::{ExecutionContext, Language};

use super::{runner_path, LanguageProfile};
use crate::executor::ExecutionMode;

const RUNNER: &str = include_str!("../../runners/runner.sh");

const DOCKERFILE: &str = "\
FROM alpine:3.19
WORKDIR /workspace
";

/// Exit code the runner reports for a command outside the allow-list.
pub const COMMAND_REJECTED_EXIT_CODE: i64 = 126;

/// Shell scripts are re-checked line by line and every command gets a hard timeout.
pub struct ShellProfile {
    allowed_commands: Vec<String>,
    per_command_timeout_secs: u64,
}

impl ShellProfile {
    pub fn new(allowed_commands: Vec<String>, per_command_timeout_secs: u64) -> Self {
        Self {
            allowed_commands,
            per_command_timeout_secs,
        }
    }
}

impl LanguageProfile for ShellProfile {
    fn language(&self) -> Language {
        Language::Shell
    }

    fn source_file(&self) -> &'static str {
        "script.sh"
    }

    fn runner_file(&self) -> &'static str {
        ".codebox_runner.sh"
    }

    fn runner_source(&self, context: &ExecutionContext) -> String {
        // Commands never outlive the run itself.
        let per_command = self
            .per_command_timeout_secs
            .min(context.timeout_secs)
            .max(1);
        let allowed: Vec<&str> = self
            .allowed_commands
            .iter()
            .map(String::as_str)
            .filter(|c| c.chars().all(|ch| ch.is_ascii_alphanumeric() || "._-".contains(ch)))
            .collect();
        RUNNER
            .replace("__ALLOWED_COMMANDS__", &allowed.join(" "))
            .replace("__PER_COMMAND_TIMEOUT__", &per_command.to_string())
    }

    fn dockerfile(&self) -> &'static str {
        DOCKERFILE
    }

    fn command(&self, mode: ExecutionMode, workdir: &str, _context: &ExecutionContext) -> Vec<String> {
        let shell = match mode {
            ExecutionMode::Isolated => "sh",
            ExecutionMode::Fallback => "bash",
        };
        vec![shell.into(), runner_path(workdir, self.runner_file())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_is_rendered_with_allow_list() {
        let profile = ShellProfile::new(vec!["echo".into(), "bad;name".into(), "seq".into()], 10);
        let context = ExecutionContext {
            language: Language::Shell,
            timeout_secs: 3,
            memory_limit_mb: 64,
            cpu_limit: 1.0,
        };
        let runner = profile.runner_source(&context);
        assert!(runner.contains("ALLOWED=\"echo seq\""));
        assert!(runner.contains("PER_COMMAND_TIMEOUT=3"));
    }

    #[test]
    fn test_fallback_uses_bash() {
        let profile = ShellProfile::new(vec![], 10);
        let context = ExecutionContext {
            language: Language::Shell,
            timeout_secs: 3,
            memory_limit_mb: 64,
            cpu_limit: 1.0,
        };
        assert_eq!(profile.command(ExecutionMode::Fallback, "/w", &context)[0], "bash");
        assert_eq!(profile.command(ExecutionMode::Isolated, "/w", &context)[0], "sh");
    }
}
