//! Resource sampling for running executions.
//!
//! A session samples one process at a fixed interval from a background task
//! and flags the first configured ceiling it goes over. The orchestrator reads
//! that flag to classify a run as a resource-limit breach.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use codebox_core::config::MonitorSettings;
use codebox_core::{LimitBreach, ResourceUsage};

pub mod proc;

/// Ceilings checked on every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorLimits {
    pub max_memory_mb: f64,
    pub max_cpu_percent: f64,
    pub max_execution_time_secs: f64,
}

impl From<&MonitorSettings> for MonitorLimits {
    fn from(s: &MonitorSettings) -> Self {
        Self {
            max_memory_mb: s.max_memory_mb,
            max_cpu_percent: s.max_cpu_percent,
            max_execution_time_secs: s.max_execution_time_secs,
        }
    }
}

impl MonitorLimits {
    /// First ceiling `usage` is over, if any.
    pub fn check(&self, usage: &ResourceUsage) -> Option<LimitBreach> {
        if usage.memory_mb > self.max_memory_mb {
            return Some(LimitBreach::Memory {
                used_mb: usage.memory_mb,
                limit_mb: self.max_memory_mb,
            });
        }
        if usage.cpu_percent > self.max_cpu_percent {
            return Some(LimitBreach::Cpu {
                used_percent: usage.cpu_percent,
                limit_percent: self.max_cpu_percent,
            });
        }
        if usage.execution_time > self.max_execution_time_secs {
            return Some(LimitBreach::ExecutionTime {
                elapsed_secs: usage.execution_time,
                limit_secs: self.max_execution_time_secs,
            });
        }
        None
    }
}

struct Session {
    pid: u32,
    latest: Option<ResourceUsage>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Samples CPU, memory and elapsed time of monitored processes.
pub struct ResourceMonitor {
    interval: Duration,
    limits: MonitorLimits,
    sessions: Arc<DashMap<String, Session>>,
}

impl ResourceMonitor {
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.sample_interval_ms.max(1)),
            limits: MonitorLimits::from(settings),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn limits(&self) -> MonitorLimits {
        self.limits
    }

    /// Start sampling `pid` under `session_id` with the configured ceilings.
    pub fn start_monitoring(&self, pid: u32, session_id: &str) {
        self.start_monitoring_with_limits(pid, session_id, self.limits);
    }

    /// Start sampling with per-session ceilings. Restarting a live session
    /// replaces it.
    pub fn start_monitoring_with_limits(&self, pid: u32, session_id: &str, limits: MonitorLimits) {
        let sessions = self.sessions.clone();
        let interval = self.interval;
        let id = session_id.to_string();

        // Insert before spawning so the first sample always finds its entry.
        if let Some(old) = self.sessions.insert(
            id.clone(),
            Session {
                pid,
                latest: None,
                task: None,
            },
        ) {
            old.abort();
        }

        let task = tokio::spawn(sample_loop(sessions, id.clone(), pid, interval, limits));
        match self.sessions.get_mut(&id) {
            Some(mut session) => session.task = Some(task),
            None => task.abort(),
        }
        tracing::debug!(session = %id, pid, "Resource monitoring started");
    }

    /// Latest sample, or `None` before the first sample or for unknown sessions.
    pub fn get_current_usage(&self, session_id: &str) -> Option<ResourceUsage> {
        self.sessions.get(session_id).and_then(|s| s.latest.clone())
    }

    /// Stop sampling and return the final usage. A second call returns `None`.
    pub fn stop_monitoring(&self, session_id: &str) -> Option<ResourceUsage> {
        let (_, session) = self.sessions.remove(session_id)?;
        session.abort();
        tracing::debug!(session = %session_id, pid = session.pid, "Resource monitoring stopped");
        session.latest
    }

    /// Stop every session.
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_monitoring(&id);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.abort();
        }
    }
}

async fn sample_loop(
    sessions: Arc<DashMap<String, Session>>,
    id: String,
    pid: u32,
    interval: Duration,
    limits: MonitorLimits,
) {
    let started = Instant::now();
    let ticks_per_sec = proc::clock_ticks_per_sec();
    let mut previous: Option<(Instant, u64)> = None;
    let mut peak_memory_mb = 0.0_f64;
    let mut breach: Option<LimitBreach> = None;
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        // Process gone: keep the last sample until the session is stopped.
        let Some(sample) = proc::read(pid) else {
            break;
        };
        let now = Instant::now();
        let cpu_percent = match previous {
            Some((at, ticks)) => {
                let wall = now.duration_since(at).as_secs_f64();
                if wall > 0.0 {
                    (sample.cpu_ticks.saturating_sub(ticks) as f64 / ticks_per_sec) / wall * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        previous = Some((now, sample.cpu_ticks));

        let memory_mb = sample.rss_kb as f64 / 1024.0;
        peak_memory_mb = peak_memory_mb.max(sample.hwm_kb as f64 / 1024.0).max(memory_mb);

        let mut usage = ResourceUsage {
            cpu_percent,
            memory_mb,
            peak_memory_mb,
            execution_time: started.elapsed().as_secs_f64(),
            limit_exceeded: false,
            breach: None,
        };
        if breach.is_none() {
            breach = limits.check(&usage);
            if let Some(b) = &breach {
                tracing::warn!(session = %id, pid, breach = %b, "Resource limit exceeded");
            }
        }
        usage.limit_exceeded = breach.is_some();
        usage.breach = breach.clone();

        match sessions.get_mut(&id) {
            Some(mut session) => session.latest = Some(usage),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            sample_interval_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_limits_check_order() {
        let limits = MonitorLimits {
            max_memory_mb: 100.0,
            max_cpu_percent: 50.0,
            max_execution_time_secs: 1.0,
        };
        let mut usage = ResourceUsage::default();
        assert!(limits.check(&usage).is_none());

        usage.cpu_percent = 80.0;
        usage.memory_mb = 200.0;
        assert!(matches!(limits.check(&usage), Some(LimitBreach::Memory { .. })));

        usage.memory_mb = 1.0;
        assert!(matches!(limits.check(&usage), Some(LimitBreach::Cpu { .. })));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let monitor = ResourceMonitor::new(&settings());
        assert!(monitor.get_current_usage("missing").is_none());
        assert!(monitor.stop_monitoring("missing").is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_samples_current_process() {
        let monitor = ResourceMonitor::new(&settings());
        // Other tests share this process; only memory is bounded.
        let limits = MonitorLimits {
            max_cpu_percent: f64::MAX,
            max_execution_time_secs: f64::MAX,
            ..monitor.limits()
        };
        monitor.start_monitoring_with_limits(std::process::id(), "self", limits);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let usage = monitor.get_current_usage("self").unwrap();
        assert!(usage.memory_mb > 0.0);
        assert!(usage.peak_memory_mb >= usage.memory_mb);
        assert!(!usage.limit_exceeded);

        assert!(monitor.stop_monitoring("self").is_some());
        assert!(monitor.stop_monitoring("self").is_none());
        assert_eq!(monitor.active_sessions(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_breach_is_flagged_and_sticky() {
        let monitor = ResourceMonitor::new(&settings());
        let limits = MonitorLimits {
            max_memory_mb: 0.001,
            ..monitor.limits()
        };
        monitor.start_monitoring_with_limits(std::process::id(), "tiny", limits);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let usage = monitor.stop_monitoring("tiny").unwrap();
        assert!(usage.limit_exceeded);
        assert!(matches!(usage.breach, Some(LimitBreach::Memory { .. })));
    }

    #[tokio::test]
    async fn test_vanished_process_keeps_no_sample() {
        let monitor = ResourceMonitor::new(&settings());
        // pid beyond pid_max never exists
        monitor.start_monitoring(u32::MAX - 1, "ghost");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.get_current_usage("ghost").is_none());
        assert!(monitor.stop_monitoring("ghost").is_none());

        monitor.start_monitoring(u32::MAX - 1, "a");
        monitor.start_monitoring(u32::MAX - 1, "b");
        monitor.stop_all();
        assert_eq!(monitor.active_sessions(), 0);
    }
}
