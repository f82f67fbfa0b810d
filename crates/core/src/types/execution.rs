use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::Language;

// =============================================================================
// Requests and Contexts
// =============================================================================

/// Caller request to execute a piece of guest code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Guest language tag (aliases accepted).
    pub language: String,
    /// Source code to execute.
    pub code: String,
    /// Requested timeout in seconds, clamped to the policy maximum.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Requested memory ceiling in MB, clamped to the policy maximum.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// Opaque caller metadata, echoed into `debug_info`.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            timeout: None,
            memory_limit_mb: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Resolved per-run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub language: Language,
    pub timeout_secs: u64,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
}

impl ExecutionContext {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Executor Results
// =============================================================================

/// Conventional exit code reported for runs killed on timeout.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Raw outcome of one executor run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub output: String,
    pub error: Option<String>,
    pub exit_code: i64,
    /// Wall time of the run in seconds.
    pub execution_time: f64,
    pub timed_out: bool,
    pub container_id: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ExecutorResult {
    /// Result for a failure caught at the executor boundary.
    pub fn failure(error_type: &str, message: impl Into<String>, execution_time: f64) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("error_type".into(), error_type.into());
        Self {
            output: String::new(),
            error: Some(message.into()),
            exit_code: -1,
            execution_time,
            timed_out: false,
            container_id: None,
            metadata,
        }
    }

    /// Exit code zero, not timed out, no error captured.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.error.as_deref().map_or(true, str::is_empty)
    }

    pub fn error_type(&self) -> Option<&str> {
        self.metadata.get("error_type").and_then(|v| v.as_str())
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata
            .get("fallback_execution")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn oom_killed(&self) -> bool {
        self.metadata
            .get("oom_killed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

// =============================================================================
// Resource Usage
// =============================================================================

/// A configured ceiling that a session went over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum LimitBreach {
    Memory { used_mb: f64, limit_mb: f64 },
    Cpu { used_percent: f64, limit_percent: f64 },
    ExecutionTime { elapsed_secs: f64, limit_secs: f64 },
}

impl std::fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitBreach::Memory { used_mb, limit_mb } => {
                write!(f, "memory {:.1} MB exceeded limit {:.1} MB", used_mb, limit_mb)
            }
            LimitBreach::Cpu {
                used_percent,
                limit_percent,
            } => write!(f, "cpu {:.1}% exceeded limit {:.1}%", used_percent, limit_percent),
            LimitBreach::ExecutionTime {
                elapsed_secs,
                limit_secs,
            } => write!(
                f,
                "execution time {:.2}s exceeded limit {:.2}s",
                elapsed_secs, limit_secs
            ),
        }
    }
}

/// One resource sample for a monitored session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub peak_memory_mb: f64,
    pub execution_time: f64,
    pub limit_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breach: Option<LimitBreach>,
}

// =============================================================================
// Caller-facing Results
// =============================================================================

/// Final status of an execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Timeout,
    SecurityViolation,
    ResourceLimitExceeded,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::SecurityViolation => "SECURITY_VIOLATION",
            ExecutionStatus::ResourceLimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Structured result returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub language: String,
    /// Total wall time in seconds, including setup.
    pub execution_time: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<ResourceUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<serde_json::Value>,
}

/// Entry in the bounded execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    pub code_hash: String,
    /// Absent when the request was rejected before a context was resolved.
    pub context: Option<ExecutionContext>,
    pub result: ExecutionResult,
}

/// Aggregate statistics over all recorded executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub success_rate: f64,
    /// Mean wall time in seconds.
    pub average_execution_time: f64,
    pub languages_used: BTreeMap<String, u64>,
    pub status_counts: BTreeMap<String, u64>,
    pub fallback_executions: u64,
    pub active_environments: usize,
    pub history_len: usize,
}

/// SHA-256 hex digest of submitted source, used to correlate records without storing code.
pub fn code_hash(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}
