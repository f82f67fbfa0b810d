//! Bounded execution history and running counters.

use std::collections::{BTreeMap, VecDeque};

use codebox_core::{ExecutionRecord, ExecutionStatistics};

/// FIFO ring of recent records plus counters over every execution since the
/// last reset. Evicting a record does not change the counters.
#[derive(Debug)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
    total: u64,
    successful: u64,
    total_time: f64,
    fallback: u64,
    languages: BTreeMap<String, u64>,
    statuses: BTreeMap<String, u64>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
            successful: 0,
            total_time: 0.0,
            fallback: 0,
            languages: BTreeMap::new(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, record: ExecutionRecord, fallback: bool) {
        self.total += 1;
        if record.result.success {
            self.successful += 1;
        }
        if fallback {
            self.fallback += 1;
        }
        self.total_time += record.result.execution_time;
        *self
            .languages
            .entry(record.language.as_str().to_string())
            .or_insert(0) += 1;
        *self
            .statuses
            .entry(record.result.status.as_str().to_string())
            .or_insert(0) += 1;

        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Newest first, at most `limit` records.
    pub fn recent(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        let limit = limit.unwrap_or(self.records.len());
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn statistics(&self, active_environments: usize) -> ExecutionStatistics {
        let (success_rate, average_execution_time) = if self.total == 0 {
            (0.0, 0.0)
        } else {
            (
                self.successful as f64 / self.total as f64,
                self.total_time / self.total as f64,
            )
        };
        ExecutionStatistics {
            total_executions: self.total,
            successful_executions: self.successful,
            failed_executions: self.total - self.successful,
            success_rate,
            average_execution_time,
            languages_used: self.languages.clone(),
            status_counts: self.statuses.clone(),
            fallback_executions: self.fallback,
            active_environments,
            history_len: self.records.len(),
        }
    }

    /// Drop every record and reset the counters.
    pub fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codebox_core::{code_hash, ExecutionResult, ExecutionStatus, Language};

    fn record(id: usize, language: Language, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: format!("exec-{}", id),
            language,
            timestamp: Utc::now(),
            code_hash: code_hash("print(1)"),
            context: None,
            result: ExecutionResult {
                execution_id: format!("exec-{}", id),
                status,
                language: language.as_str().to_string(),
                execution_time: 1.0,
                success: status == ExecutionStatus::Completed,
                exit_code: None,
                output: None,
                error: None,
                error_type: None,
                resource_usage: None,
                debug_info: None,
            },
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = ExecutionHistory::new(3);
        for i in 0..5 {
            history.push(record(i, Language::Python, ExecutionStatus::Completed), false);
        }
        assert_eq!(history.len(), 3);
        let ids: Vec<_> = history
            .recent(None)
            .into_iter()
            .map(|r| r.execution_id)
            .collect();
        assert_eq!(ids, vec!["exec-4", "exec-3", "exec-2"]);
        assert_eq!(history.recent(Some(1)).len(), 1);

        // Counters cover evicted records too.
        assert_eq!(history.statistics(0).total_executions, 5);
    }

    #[test]
    fn test_statistics() {
        let mut history = ExecutionHistory::new(10);
        history.push(record(0, Language::Python, ExecutionStatus::Completed), false);
        history.push(record(1, Language::Shell, ExecutionStatus::Failed), true);
        history.push(record(2, Language::Shell, ExecutionStatus::Completed), false);
        history.push(record(3, Language::JavaScript, ExecutionStatus::Timeout), false);

        let stats = history.statistics(2);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.failed_executions, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.average_execution_time - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.languages_used["shell"], 2);
        assert_eq!(stats.status_counts["TIMEOUT"], 1);
        assert_eq!(stats.fallback_executions, 1);
        assert_eq!(stats.active_environments, 2);

        history.clear();
        let stats = history.statistics(0);
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(history.is_empty());
    }
}
