use codebox_core::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::policy::SecurityPolicy;

/// Unprivileged `nobody:nogroup` identity runs execute as.
pub const SANDBOX_USER: &str = "65534:65534";

/// Engine-neutral description of one isolated run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub env: Vec<String>,
    /// `host:container[:mode]` bind mounts.
    pub binds: Vec<String>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub network_disabled: bool,
    pub read_only_root: bool,
    /// Mount point to mount options.
    pub tmpfs: HashMap<String, String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub pids_limit: Option<i64>,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Merge a language's resource limits and hardening options into `base`.
///
/// Restriction fields are overwritten rather than appended, so applying the
/// same policy twice yields the same spec.
pub fn apply_restrictions(
    mut base: ContainerSpec,
    language: Language,
    policy: &SecurityPolicy,
) -> ContainerSpec {
    let limits = policy.limits(language);

    base.memory_bytes = Some(limits.memory_bytes());
    base.nano_cpus = Some(limits.nano_cpus());
    base.pids_limit = Some(limits.pids_limit);
    base.network_disabled = true;
    base.read_only_root = true;
    base.user = Some(SANDBOX_USER.to_string());
    base.cap_drop = vec!["ALL".to_string()];
    base.security_opt = vec!["no-new-privileges".to_string()];
    base.tmpfs.insert(
        "/tmp".to_string(),
        format!("rw,noexec,nosuid,size={}m", limits.tmpfs_size_mb),
    );
    base.labels
        .insert("codebox.language".to_string(), language.as_str().to_string());
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ContainerSpec {
        ContainerSpec::new("codebox-1", "codebox-python:latest")
            .with_command(vec!["python3".into(), "main.py".into()])
            .with_bind("/tmp/ws:/workspace:rw")
            .with_working_dir("/workspace")
    }

    #[test]
    fn test_restrictions_harden_spec() {
        let policy = SecurityPolicy::default();
        let spec = apply_restrictions(base(), Language::Python, &policy);
        assert!(spec.network_disabled);
        assert!(spec.read_only_root);
        assert_eq!(spec.user.as_deref(), Some(SANDBOX_USER));
        assert_eq!(spec.cap_drop, vec!["ALL".to_string()]);
        assert_eq!(spec.security_opt, vec!["no-new-privileges".to_string()]);
        assert_eq!(spec.memory_bytes, Some(256 * 1024 * 1024));
        assert!(spec.tmpfs["/tmp"].contains("noexec,nosuid"));
        assert_eq!(spec.binds, vec!["/tmp/ws:/workspace:rw".to_string()]);
    }

    #[test]
    fn test_restrictions_are_idempotent() {
        let policy = SecurityPolicy::default();
        let once = apply_restrictions(base(), Language::Shell, &policy);
        let twice = apply_restrictions(once.clone(), Language::Shell, &policy);
        assert_eq!(once, twice);
    }
}
