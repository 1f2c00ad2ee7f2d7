//! Auto-Approval (component C6, §4.8): a six-gate eligibility engine that
//! transitions a freshly generated task to `approved` within seconds, with
//! every decision audited.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tgt_core::TaskCard;
use tgt_core::TgtConfig;
use tokio::sync::Mutex;
use tracing::info;

use crate::audit::AuditWriter;
use crate::store::TaskStore;

const RATE_LIMIT_WINDOW_MIN: i64 = 60;
/// Tasks generated in the last `bootstrap` window (too few to trust a
/// historical approval rate) pass gate 3 automatically.
const BOOTSTRAP_SAMPLE: usize = 10;
const AUTO_APPROVABLE_TYPES: &[&str] = &["continuation_issue", "error_spike"];

pub struct AutoApprovalEngine {
    config: TgtConfig,
    store: Arc<TaskStore>,
    audit: Arc<AuditWriter>,
    recent_approvals: Mutex<Vec<chrono::DateTime<Utc>>>,
    total_considered: AtomicU64,
    total_approved: AtomicU64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AutoApprovalStats {
    pub total_considered: u64,
    pub total_approved: u64,
    pub rate_limit_remaining: usize,
}

impl AutoApprovalEngine {
    pub fn new(config: TgtConfig, store: Arc<TaskStore>, audit: Arc<AuditWriter>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            audit,
            recent_approvals: Mutex::new(Vec::new()),
            total_considered: AtomicU64::new(0),
            total_approved: AtomicU64::new(0),
        })
    }

    /// Runs all six gates for a single freshly generated task and, if
    /// eligible, transitions it to `approved` — meant to be invoked within
    /// `SuggestedFix::estimated_effort`'s sibling concept, i.e. within
    /// seconds of the scheduler saving the task (§4.8's latency bound).
    pub async fn consider(&self, task: &TaskCard) -> anyhow::Result<bool> {
        let trusted: HashSet<&str> = self
            .config
            .auto_approve_analyzers
            .iter()
            .map(String::as_str)
            .collect();

        let (approved, rationale) = self.evaluate(task, &trusted).await?;
        self.total_considered.fetch_add(1, Ordering::Relaxed);

        self.audit
            .record_auto_approval(&task.id, approved, &rationale)
            .await
            .ok();

        if approved {
            self.store.approve(&task.id).await?;
            self.total_approved.fetch_add(1, Ordering::Relaxed);
            let mut recent = self.recent_approvals.lock().await;
            recent.push(Utc::now());
        }

        Ok(approved)
    }

    async fn evaluate(&self, task: &TaskCard, trusted: &HashSet<&str>) -> anyhow::Result<(bool, String)> {
        // Gate 1: feature enabled.
        if !self.config.auto_approve {
            return Ok((false, "auto-approval disabled".to_string()));
        }

        // Gate 2: confidence threshold.
        if task.confidence < self.config.auto_approve_confidence {
            return Ok((
                false,
                format!(
                    "confidence {:.2} below threshold {:.2}",
                    task.confidence, self.config.auto_approve_confidence
                ),
            ));
        }

        // Gate 3: analyzer is in the trusted set.
        if !trusted.contains(task.analyzer.as_str()) {
            return Ok((false, format!("analyzer '{}' not trusted", task.analyzer)));
        }

        // Gate 4: historical approval rate of this analyzer, bootstrapped if
        // too little history.
        let (approved_count, dismissed_count) = self.store.analyzer_outcomes(&task.analyzer).await?;
        let decided = approved_count + dismissed_count;
        if decided >= BOOTSTRAP_SAMPLE {
            let approval_rate = approved_count as f64 / decided as f64;
            if approval_rate < 0.80 {
                return Ok((
                    false,
                    format!(
                        "analyzer '{}' historical approval rate {approval_rate:.2} below 0.80",
                        task.analyzer
                    ),
                ));
            }
        }

        // Gate 5: hourly auto-approval quota.
        let remaining = self.rate_limit_remaining().await;
        if remaining == 0 {
            return Ok((false, "hourly auto-approval quota exhausted".to_string()));
        }

        // Gate 6: task type is in the auto-approvable set.
        let type_key = serde_json::to_value(task.task_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        if !AUTO_APPROVABLE_TYPES.contains(&type_key.as_str()) {
            return Ok((false, format!("task type '{type_key}' not auto-approvable")));
        }

        info!(task_id = %task.id, "task passed all six auto-approval gates");
        Ok((true, "passed all eligibility gates".to_string()))
    }

    async fn rate_limit_remaining(&self) -> usize {
        let mut recent = self.recent_approvals.lock().await;
        let cutoff = Utc::now() - chrono::Duration::minutes(RATE_LIMIT_WINDOW_MIN);
        recent.retain(|ts| *ts >= cutoff);
        self.config.auto_approve_max_per_hour.saturating_sub(recent.len())
    }

    pub async fn stats(&self) -> AutoApprovalStats {
        AutoApprovalStats {
            total_considered: self.total_considered.load(Ordering::Relaxed),
            total_approved: self.total_approved.load(Ordering::Relaxed),
            rate_limit_remaining: self.rate_limit_remaining().await,
        }
    }

    /// Drives `consider()` over every freshly generated task whenever the
    /// task store reports a change, so a task can reach `approved` within
    /// seconds of the scheduler saving it. Grounded on the same
    /// subscribe-and-select shutdown shape as [`crate::scheduler::Scheduler::run_loop`].
    pub async fn run_loop(
        self: Arc<Self>,
        mut store_changed: tokio::sync::broadcast::Receiver<()>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = store_changed.recv() => {
                    if let Err(e) = self.consider_generated().await {
                        tracing::warn!(error = %e, "auto-approval sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("auto-approval loop shutting down");
                    break;
                }
            }
        }
    }

    async fn consider_generated(&self) -> anyhow::Result<()> {
        use tgt_core::task::{Status, TaskFilter};

        let filter = TaskFilter {
            status: Some(Status::Generated),
            task_type: None,
        };
        let generated = self.store.load(&filter, usize::MAX).await?;
        for task in &generated {
            self.consider(task).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgt_core::task::{Evidence, Severity, Status, SuggestedFix, TaskType};

    fn test_audit() -> Arc<AuditWriter> {
        AuditWriter::new(tempfile::tempdir().unwrap().keep()).unwrap()
    }

    fn sample() -> TaskCard {
        TaskCard {
            id: "t1".into(),
            task_type: TaskType::ContinuationIssue,
            severity: Severity::High,
            status: Status::Generated,
            title: "Investigate".into(),
            description: "d".into(),
            evidence: Evidence {
                summary: "s".into(),
                ..Default::default()
            },
            suggested_fix: SuggestedFix::default(),
            acceptance_criteria: vec!["x".into()],
            priority: 80,
            confidence: 0.95,
            analyzer: "continuation".into(),
            generated_at: Utc::now(),
            approved_at: None,
            dismissed_at: None,
            completed_at: None,
            dismiss_reason: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn disabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), test_audit()).unwrap();
        let audit = AuditWriter::new(log_dir.path()).unwrap();
        let engine = AutoApprovalEngine::new(TgtConfig::default(), store.clone(), audit);

        let task = sample();
        store.save(&task).await.unwrap();
        let approved = engine.consider(&task).await.unwrap();
        assert!(!approved);
    }

    #[tokio::test]
    async fn enabled_and_eligible_approves() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), test_audit()).unwrap();
        let audit = AuditWriter::new(log_dir.path()).unwrap();
        let config = TgtConfig {
            auto_approve: true,
            ..TgtConfig::default()
        };
        let engine = AutoApprovalEngine::new(config, store.clone(), audit);

        let task = sample();
        store.save(&task).await.unwrap();
        let approved = engine.consider(&task).await.unwrap();
        assert!(approved);
        let stored = store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Approved);
    }

    #[tokio::test]
    async fn untrusted_analyzer_is_declined() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), test_audit()).unwrap();
        let audit = AuditWriter::new(log_dir.path()).unwrap();
        let config = TgtConfig {
            auto_approve: true,
            ..TgtConfig::default()
        };
        let engine = AutoApprovalEngine::new(config, store.clone(), audit);

        let mut task = sample();
        task.analyzer = "ux_issue".to_string();
        store.save(&task).await.unwrap();
        let approved = engine.consider(&task).await.unwrap();
        assert!(!approved);
    }
}
