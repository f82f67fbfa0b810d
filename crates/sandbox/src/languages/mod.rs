//! Per-language run profiles.
//!
//! A profile knows the canonical source filename, the runner that wraps user
//! code and writes the result envelope, the interpreter command line and the
//! image build definition for its language.

use std::sync::Arc;

use codebox_core::{ExecutionContext, Language};
use codebox_security::SecurityPolicy;

use crate::executor::ExecutionMode;

pub mod javascript;
pub mod python;
pub mod shell;

pub use javascript::JavaScriptProfile;
pub use python::PythonProfile;
pub use shell::ShellProfile;

/// Filename of the JSON result envelope written by every runner.
pub const ENVELOPE_FILE: &str = ".codebox_result.json";

/// Mount point of the workspace inside a container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

pub trait LanguageProfile: Send + Sync {
    fn language(&self) -> Language;

    /// Canonical filename the user's code is written to.
    fn source_file(&self) -> &'static str;

    /// Filename of the runner script placed next to the source.
    fn runner_file(&self) -> &'static str;

    /// Runner script contents, rendered for this policy.
    fn runner_source(&self, context: &ExecutionContext) -> String;

    /// Build definition for the language image.
    fn dockerfile(&self) -> &'static str;

    /// Image name suffix, appended to the configured prefix.
    fn image_suffix(&self) -> &'static str {
        self.language().as_str()
    }

    /// Interpreter argv that runs the runner located in `workdir`.
    fn command(&self, mode: ExecutionMode, workdir: &str, context: &ExecutionContext) -> Vec<String>;

    /// Extra environment for the run.
    fn env(&self, _workdir: &str, _context: &ExecutionContext) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Build the profile for a language from its policy.
pub fn profile_for(language: Language, policy: &SecurityPolicy) -> Arc<dyn LanguageProfile> {
    let rules = policy.language(language);
    match language {
        Language::Python => Arc::new(PythonProfile::new(rules.allowed_modules.clone())),
        Language::JavaScript => Arc::new(JavaScriptProfile),
        Language::Shell => Arc::new(ShellProfile::new(
            rules.allowed_commands.clone(),
            rules.resource_limits.per_command_timeout_secs,
        )),
    }
}

pub(crate) fn runner_path(workdir: &str, file: &str) -> String {
    format!("{}/{}", workdir.trim_end_matches('/'), file)
}
