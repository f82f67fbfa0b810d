//! Process-wide runtime context.
//!
//! Built once at startup: configuration, the loaded security policy, the
//! validator, the resource monitor and one executor per language. The
//! executors are either container-backed or, when the isolation runtime is
//! unreachable, host fallbacks.

use std::collections::HashMap;
use std::sync::Arc;

use codebox_core::config::AppConfig;
use codebox_core::{Error, Language, Result};
use codebox_monitor::ResourceMonitor;
use codebox_sandbox::{
    profile_for, ContainerExecutor, DockerRuntime, Executor, FallbackExecutor, IsolationRuntime,
};
use codebox_security::{SecurityPolicy, SecurityValidator};

pub struct RuntimeContext {
    pub config: AppConfig,
    pub policy: Arc<SecurityPolicy>,
    pub validator: Arc<SecurityValidator>,
    pub monitor: Arc<ResourceMonitor>,
    executors: HashMap<Language, Arc<dyn Executor>>,
    fallback_mode: bool,
}

impl RuntimeContext {
    pub fn builder(config: AppConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Build the context, probing the local Docker daemon.
    pub async fn init(config: AppConfig) -> Result<Self> {
        RuntimeBuilder::new(config).build().await
    }

    pub fn executor(&self, language: Language) -> Result<Arc<dyn Executor>> {
        self.executors
            .get(&language)
            .cloned()
            .ok_or_else(|| Error::internal(format!("No executor installed for {}", language)))
    }

    /// True when executors run on the host without isolation.
    pub fn is_fallback_mode(&self) -> bool {
        self.fallback_mode
    }

    /// Stop background sampling. Environments are owned by the orchestrator
    /// and torn down there.
    pub fn shutdown(&self) {
        self.monitor.stop_all();
        tracing::info!("Runtime context shut down");
    }
}

/// Builder for [`RuntimeContext`].
pub struct RuntimeBuilder {
    config: AppConfig,
    policy: Option<Arc<SecurityPolicy>>,
    runtime: Option<Arc<dyn IsolationRuntime>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            policy: None,
            runtime: None,
        }
    }

    /// Use this policy instead of loading `sandbox.policy_path`.
    pub fn with_policy(mut self, policy: Arc<SecurityPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Use this isolation runtime instead of connecting to Docker.
    pub fn with_runtime(mut self, runtime: Arc<dyn IsolationRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub async fn build(self) -> Result<RuntimeContext> {
        let sandbox = &self.config.sandbox;
        let policy = match self.policy {
            Some(policy) => policy,
            None => Arc::new(SecurityPolicy::load_or_default(sandbox.policy_path.as_deref())),
        };
        let validator = Arc::new(SecurityValidator::new(policy.clone()));
        let monitor = Arc::new(ResourceMonitor::new(&self.config.monitor));

        tokio::fs::create_dir_all(&sandbox.workspace_root)
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "Cannot create workspace root {}: {}",
                    sandbox.workspace_root.display(),
                    e
                ))
            })?;

        let runtime = if sandbox.prefer_isolation {
            Self::reachable_runtime(self.runtime).await
        } else {
            None
        };

        let fallback_mode = runtime.is_none();
        let mut executors: HashMap<Language, Arc<dyn Executor>> = HashMap::new();
        for language in Language::ALL {
            let profile = profile_for(language, &policy);
            let executor: Arc<dyn Executor> = match &runtime {
                Some(runtime) => Arc::new(ContainerExecutor::new(
                    profile,
                    runtime.clone(),
                    validator.clone(),
                    &sandbox.image_prefix,
                )),
                None => Arc::new(FallbackExecutor::new(profile, validator.clone())),
            };
            executors.insert(language, executor);
        }

        if fallback_mode {
            tracing::warn!(
                "Isolation runtime unavailable, running guest code on the host without isolation"
            );
        } else {
            tracing::info!(image_prefix = %sandbox.image_prefix, "Container isolation enabled");
        }

        Ok(RuntimeContext {
            config: self.config,
            policy,
            validator,
            monitor,
            executors,
            fallback_mode,
        })
    }

    async fn reachable_runtime(
        configured: Option<Arc<dyn IsolationRuntime>>,
    ) -> Option<Arc<dyn IsolationRuntime>> {
        let runtime = match configured {
            Some(runtime) => runtime,
            None => match DockerRuntime::new() {
                Ok(docker) => Arc::new(docker) as Arc<dyn IsolationRuntime>,
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot connect to Docker");
                    return None;
                }
            },
        };
        if runtime.is_available().await {
            Some(runtime)
        } else {
            None
        }
    }
}
