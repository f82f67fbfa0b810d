use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::Language;

/// Unique identifier for a per-execution environment.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentId(pub String);

impl EnvironmentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EnvironmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Isolated workspace owned by the orchestrator for exactly one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub language: Language,
    pub working_directory: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn new(language: Language, workspace_root: &std::path::Path) -> Self {
        let id = EnvironmentId::new();
        let working_directory = workspace_root.join(&id.0);
        Self {
            id,
            language,
            working_directory,
            created_at: Utc::now(),
        }
    }

    /// Name of the single container bound to this environment.
    pub fn container_name(&self) -> String {
        format!("codebox-{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_ids_and_paths_are_unique() {
        let root = std::path::Path::new("/tmp/codebox-test");
        let a = Environment::new(Language::Python, root);
        let b = Environment::new(Language::Python, root);
        assert_ne!(a.id, b.id);
        assert_ne!(a.working_directory, b.working_directory);
        assert_ne!(a.container_name(), b.container_name());
        assert!(a.working_directory.starts_with(root));
        assert!(a.container_name().starts_with("codebox-"));

        // Liveness is tracked by the orchestrator's registry, not on the value.
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(
            json.as_object().unwrap().keys().map(String::as_str).collect::<Vec<_>>(),
            ["created_at", "id", "language", "working_directory"]
        );
    }
}
