//! Per-language security policies.
//!
//! A policy file is a YAML mapping from guest language to rule set. Any field
//! left out of a language entry keeps the built-in default for that language,
//! and languages missing from the file keep their built-in policy entirely.

use anyhow::{Context, Result};
use codebox_core::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// =============================================================================
// Policy Types
// =============================================================================

/// Resource ceilings applied to every run of one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    pub cpu_cores: f64,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub pids_limit: i64,
    pub tmpfs_size_mb: u64,
    /// Hard ceiling for a single shell command.
    pub per_command_timeout_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            cpu_cores: 1.0,
            default_timeout_secs: 30,
            max_timeout_secs: 300,
            pids_limit: 64,
            tmpfs_size_mb: 64,
            per_command_timeout_secs: 10,
        }
    }
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64).saturating_mul(1024 * 1024)
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_cores * 1_000_000_000.0) as i64
    }
}

/// A pattern that raises a MEDIUM finding without blocking execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousPattern {
    /// Regular expression matched against raw source.
    pub pattern: String,
    pub description: String,
}

impl SuspiciousPattern {
    fn new(pattern: &str, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }
}

/// Complete rule set for one guest language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguagePolicy {
    pub forbidden_imports: Vec<String>,
    pub forbidden_functions: Vec<String>,
    /// Regular expressions; every match is a HIGH finding.
    pub forbidden_patterns: Vec<String>,
    /// Commands matched on word boundaries, HIGH severity.
    pub forbidden_commands: Vec<String>,
    /// Privilege-escalation and destructive commands, CRITICAL severity.
    pub critical_commands: Vec<String>,
    /// Commands the shell wrapper lets through at run time.
    pub allowed_commands: Vec<String>,
    /// Modules the Python wrapper's guarded import admits.
    pub allowed_modules: Vec<String>,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
    pub resource_limits: ResourceLimits,
}

/// A language entry as written in a policy file; unset fields keep defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LanguagePolicyOverride {
    forbidden_imports: Option<Vec<String>>,
    forbidden_functions: Option<Vec<String>>,
    forbidden_patterns: Option<Vec<String>>,
    forbidden_commands: Option<Vec<String>>,
    critical_commands: Option<Vec<String>>,
    allowed_commands: Option<Vec<String>>,
    allowed_modules: Option<Vec<String>>,
    suspicious_patterns: Option<Vec<SuspiciousPattern>>,
    resource_limits: Option<ResourceLimits>,
}

impl LanguagePolicy {
    fn apply(&mut self, o: LanguagePolicyOverride) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = o.$field { self.$field = v; })*
            };
        }
        take!(
            forbidden_imports,
            forbidden_functions,
            forbidden_patterns,
            forbidden_commands,
            critical_commands,
            allowed_commands,
            allowed_modules,
            suspicious_patterns,
            resource_limits
        );
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Built-in Defaults
// =============================================================================

impl LanguagePolicy {
    /// Built-in policy for a language.
    pub fn default_for(language: Language) -> Self {
        match language {
            Language::Python => Self::python(),
            Language::JavaScript => Self::javascript(),
            Language::Shell => Self::shell(),
        }
    }

    fn python() -> Self {
        Self {
            forbidden_imports: strings(&[
                "os", "sys", "subprocess", "shutil", "socket", "ctypes", "multiprocessing",
                "threading", "signal", "pty", "pickle", "marshal", "shelve", "importlib",
                "builtins", "inspect", "gc", "resource", "platform", "urllib", "http",
                "ftplib", "smtplib", "telnetlib", "requests", "asyncio", "tempfile", "glob",
                "pathlib", "code", "codeop", "webbrowser", "mmap", "fcntl",
            ]),
            forbidden_functions: strings(&[
                "eval", "exec", "compile", "open", "__import__", "input", "globals", "locals",
                "vars", "getattr", "setattr", "delattr", "breakpoint", "exit", "quit", "help",
                "memoryview",
            ]),
            forbidden_patterns: strings(&[
                r"__(subclasses|globals|builtins|bases|mro|code|closure|loader)__",
                r"\bos\s*\.\s*(system|popen|fork|kill|remove|rmdir|unlink)\s*\(",
            ]),
            forbidden_commands: Vec::new(),
            critical_commands: Vec::new(),
            allowed_commands: Vec::new(),
            allowed_modules: strings(&[
                "math", "random", "time", "json", "re", "datetime", "collections", "itertools",
                "functools", "string", "statistics", "decimal", "fractions", "heapq", "bisect",
                "operator", "typing", "dataclasses", "enum", "copy", "numpy", "pandas",
            ]),
            suspicious_patterns: Vec::new(),
            resource_limits: ResourceLimits::default(),
        }
    }

    fn javascript() -> Self {
        Self {
            forbidden_imports: strings(&[
                "child_process", "fs", "fs/promises", "net", "dgram", "http", "https", "http2",
                "cluster", "worker_threads", "vm", "os", "process", "v8", "inspector", "tls",
                "dns", "module", "repl",
            ]),
            forbidden_functions: strings(&[
                "eval", "Function", "execSync", "spawnSync", "execFile", "importScripts",
            ]),
            forbidden_patterns: strings(&[
                r"process\s*\.\s*(exit|kill|binding|env|mainModule|dlopen)",
                r"__proto__",
                r"constructor\s*\.\s*constructor",
            ]),
            forbidden_commands: Vec::new(),
            critical_commands: Vec::new(),
            allowed_commands: Vec::new(),
            allowed_modules: Vec::new(),
            suspicious_patterns: vec![
                SuspiciousPattern::new(
                    r"\b(localStorage|sessionStorage|indexedDB)\b",
                    "Persistent storage access",
                ),
                SuspiciousPattern::new(
                    r"\b(fetch|XMLHttpRequest|WebSocket|sendBeacon)\b",
                    "Outbound network access",
                ),
            ],
            resource_limits: ResourceLimits::default(),
        }
    }

    fn shell() -> Self {
        Self {
            forbidden_imports: Vec::new(),
            forbidden_functions: Vec::new(),
            forbidden_patterns: strings(&[
                // output redirection; only fd duplication like `2>&1` or `>&2` passes
                r">{1,2}\s*([^&\s]|&\s*([^0-9\s-]|[0-9-]\S))",
                r"\|\s*(ba|z|da|k)?sh\b",
                r";|&&|\|\|",
                r"`",
                r"\$\(",
                r"/dev/(tcp|udp)/",
                r":\s*\(\s*\)\s*\{",
            ]),
            forbidden_commands: strings(&[
                "curl", "wget", "nc", "ncat", "netcat", "ssh", "scp", "sftp", "ftp", "telnet",
                "rsync", "kill", "killall", "pkill", "mount", "umount", "crontab", "nohup",
                "eval", "exec", "source", "python", "python3", "perl", "ruby", "node", "bash",
                "zsh",
            ]),
            critical_commands: strings(&[
                "rm", "sudo", "su", "doas", "dd", "mkfs", "fdisk", "shutdown", "reboot", "halt",
                "poweroff", "chmod", "chown", "passwd", "useradd", "userdel", "systemctl",
                "init",
            ]),
            allowed_commands: strings(&[
                "echo", "printf", "cat", "ls", "pwd", "date", "head", "tail", "wc", "sort",
                "uniq", "grep", "sed", "awk", "cut", "tr", "seq", "expr", "test", "true",
                "false", "sleep", "basename", "dirname", "rev",
            ]),
            allowed_modules: Vec::new(),
            suspicious_patterns: Vec::new(),
            resource_limits: ResourceLimits {
                memory_mb: 128,
                ..ResourceLimits::default()
            },
        }
    }
}

// =============================================================================
// Policy Set
// =============================================================================

/// Immutable mapping from guest language to its policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    languages: HashMap<Language, LanguagePolicy>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            languages: Language::ALL
                .iter()
                .map(|&l| (l, LanguagePolicy::default_for(l)))
                .collect(),
        }
    }
}

impl SecurityPolicy {
    /// Load a policy file; languages absent from it keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read policy file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let overrides: HashMap<Language, LanguagePolicyOverride> =
            serde_yaml::from_str(content).with_context(|| "Failed to parse policy YAML")?;

        let mut policy = Self::default();
        for (language, o) in overrides {
            if let Some(entry) = policy.languages.get_mut(&language) {
                entry.apply(o);
            }
        }
        Ok(policy)
    }

    /// Load from an optional path, substituting defaults on any failure.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(policy) => {
                tracing::info!(path = %path.display(), "Loaded security policy");
                policy
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "Failed to load security policy, using built-in defaults"
                );
                Self::default()
            }
        }
    }

    pub fn language(&self, language: Language) -> &LanguagePolicy {
        // Every language is populated on construction.
        &self.languages[&language]
    }

    pub fn limits(&self, language: Language) -> &ResourceLimits {
        &self.language(language).resource_limits
    }
}
