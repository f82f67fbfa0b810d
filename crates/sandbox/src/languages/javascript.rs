use codebox_core::{ExecutionContext, Language};

use super::{runner_path, LanguageProfile};
use crate::executor::ExecutionMode;

const RUNNER: &str = include_str!("../../runners/runner.js");

const DOCKERFILE: &str = "\
FROM node:20-alpine
ENV NODE_ENV=production
WORKDIR /workspace
";

/// JavaScript runs inside a `vm` context with a captured console and no `require`.
pub struct JavaScriptProfile;

impl JavaScriptProfile {
    /// V8 old-space ceiling, leaving headroom below the container limit.
    fn heap_mb(context: &ExecutionContext) -> u64 {
        (context.memory_limit_mb * 3 / 4).max(16)
    }
}

impl LanguageProfile for JavaScriptProfile {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn source_file(&self) -> &'static str {
        "main.js"
    }

    fn runner_file(&self) -> &'static str {
        ".codebox_runner.js"
    }

    fn runner_source(&self, context: &ExecutionContext) -> String {
        let timeout_ms = context.timeout_secs.saturating_mul(1000);
        RUNNER.replace("__TIMEOUT_MS__", &timeout_ms.to_string())
    }

    fn dockerfile(&self) -> &'static str {
        DOCKERFILE
    }

    fn command(&self, _mode: ExecutionMode, workdir: &str, context: &ExecutionContext) -> Vec<String> {
        vec![
            "node".into(),
            format!("--max-old-space-size={}", Self::heap_mb(context)),
            runner_path(workdir, self.runner_file()),
        ]
    }

    fn env(&self, workdir: &str, _context: &ExecutionContext) -> Vec<(String, String)> {
        vec![("NODE_PATH".into(), workdir.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_limit_follows_memory_limit() {
        let context = ExecutionContext {
            language: Language::JavaScript,
            timeout_secs: 2,
            memory_limit_mb: 256,
            cpu_limit: 1.0,
        };
        let cmd = JavaScriptProfile.command(ExecutionMode::Fallback, "/tmp/ws", &context);
        assert_eq!(cmd[1], "--max-old-space-size=192");
        assert!(JavaScriptProfile
            .runner_source(&context)
            .contains("timeout: 2000"));
        assert_eq!(
            JavaScriptProfile.env("/tmp/ws", &context),
            vec![("NODE_PATH".to_string(), "/tmp/ws".to_string())]
        );
    }
}
