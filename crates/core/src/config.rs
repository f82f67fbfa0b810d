use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sandbox: SandboxSettings,
    pub monitor: MonitorSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    /// Directory under which per-execution workspaces are created.
    pub workspace_root: PathBuf,
    /// YAML security policy file. Built-in defaults are used when unset.
    pub policy_path: Option<PathBuf>,
    /// Maximum number of execution records kept in memory.
    pub history_capacity: usize,
    /// Extra wall time granted on top of the run timeout for setup and teardown.
    pub setup_grace_secs: u64,
    /// Use container isolation when the runtime is reachable.
    pub prefer_isolation: bool,
    /// Prefix for per-language images (`<prefix>-python:latest`).
    pub image_prefix: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("codebox"),
            policy_path: None,
            history_capacity: 1000,
            setup_grace_secs: 10,
            prefer_isolation: true,
            image_prefix: "codebox".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorSettings {
    pub sample_interval_ms: u64,
    pub max_memory_mb: f64,
    pub max_cpu_percent: f64,
    pub max_execution_time_secs: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
            max_memory_mb: 512.0,
            max_cpu_percent: 200.0,
            max_execution_time_secs: 60.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TelemetrySettings {
    pub json_logs: bool,
    pub metrics_enabled: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CODEBOX_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map CODEBOX__SANDBOX__HISTORY_CAPACITY=50 to sandbox.history_capacity
            .add_source(Environment::with_prefix("CODEBOX").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load configuration from one explicit file, layered over defaults.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        s.try_deserialize()
    }
}
