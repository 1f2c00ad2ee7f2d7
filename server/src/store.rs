//! The Task Store (component C4): append-only JSONL persistence under an
//! exclusive writer lock, with last-write-wins-by-id read semantics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tgt_core::error::{ConflictError, NotFoundError};
use tgt_core::task::{sort_tasks, Status, TaskFilter};
use tgt_core::TaskCard;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::audit::AuditWriter;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub avg_priority: f64,
    pub avg_confidence: f64,
}

/// Owns `<root>/tasks/generated_tasks.jsonl`. Writes are serialized through
/// an exclusive in-process lock; the file is opened in append mode so the OS
/// guarantees small-line appends are atomic even against an external writer.
pub struct TaskStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    change_tx: broadcast::Sender<()>,
    audit: Arc<AuditWriter>,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>, audit: Arc<AuditWriter>) -> anyhow::Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("generated_tasks.jsonl");
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            path,
            write_lock: Mutex::new(()),
            change_tx,
            audit,
        }))
    }

    /// Subscribes to the in-process store-changed signal (§4.4's low-latency
    /// source, independent of the file watcher).
    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.change_tx.subscribe()
    }

    fn notify_changed(&self) {
        let _ = self.change_tx.send(());
    }

    /// Streams the file, builds `id -> latest record`, applies `filter`, and
    /// returns records sorted per the task model's stable sort, bounded by
    /// `limit`.
    pub async fn load(&self, filter: &TaskFilter, limit: usize) -> anyhow::Result<Vec<TaskCard>> {
        let latest = self.read_latest_by_id().await?;
        let mut tasks: Vec<TaskCard> = latest
            .into_values()
            .filter(|t| filter.matches(t))
            .collect();
        sort_tasks(&mut tasks);
        tasks.truncate(limit);
        Ok(tasks)
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<TaskCard>> {
        let latest = self.read_latest_by_id().await?;
        Ok(latest.get(id).cloned())
    }

    /// The titles of currently-active tasks (status ∈ {generated, approved}),
    /// used by the scheduler's duplicate gate (I5).
    pub async fn active_titles(&self) -> anyhow::Result<std::collections::HashSet<String>> {
        let latest = self.read_latest_by_id().await?;
        Ok(latest
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.title.clone())
            .collect())
    }

    /// Count of currently `generated` tasks, capped at `limit` (§4.6's
    /// "active task list with status = generated, limit 50" broadcast
    /// signal).
    pub async fn generated_count(&self, limit: usize) -> anyhow::Result<usize> {
        let latest = self.read_latest_by_id().await?;
        let count = latest.values().filter(|t| t.status == Status::Generated).count();
        Ok(count.min(limit))
    }

    /// Historical approved-vs-dismissed outcome counts for a single
    /// analyzer, over all time (§4.7 gate 4). `approved` counts tasks
    /// currently `approved` or `completed`.
    pub async fn analyzer_outcomes(&self, analyzer: &str) -> anyhow::Result<(usize, usize)> {
        let latest = self.read_latest_by_id().await?;
        let mut approved = 0usize;
        let mut dismissed = 0usize;
        for task in latest.values().filter(|t| t.analyzer == analyzer) {
            match task.status {
                Status::Approved | Status::Completed => approved += 1,
                Status::Dismissed => dismissed += 1,
                Status::Generated => {}
            }
        }
        Ok((approved, dismissed))
    }

    async fn read_latest_by_id(&self) -> anyhow::Result<HashMap<String, TaskCard>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let file = tokio::fs::File::open(&self.path).await?;
        let mut reader = tokio::io::BufReader::new(file).lines();
        let mut latest = HashMap::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskCard>(&line) {
                Ok(task) => {
                    latest.insert(task.id.clone(), task);
                }
                Err(e) => {
                    warn!(error = %e, "discarding corrupt task-store line");
                }
            }
        }
        Ok(latest)
    }

    /// Appends the full current record as a single line, under the
    /// exclusive writer lock, then emits the store-changed signal.
    pub async fn save(&self, task: &TaskCard) -> anyhow::Result<()> {
        task.validate()?;
        let _guard = self.write_lock.lock().await;
        let line = serde_json::to_string(task)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        drop(file);
        drop(_guard);

        self.notify_changed();
        Ok(())
    }

    async fn transition(&self, id: &str, to: Status, mutate: impl FnOnce(&mut TaskCard)) -> Result<TaskCard, TaskStoreError> {
        let current = self
            .get(id)
            .await
            .map_err(TaskStoreError::Io)?
            .ok_or_else(|| TaskStoreError::NotFound(NotFoundError(id.to_string())))?;

        let now = Utc::now();
        match current.transition(to, now) {
            Some(mut next) => {
                mutate(&mut next);
                self.save(&next).await.map_err(TaskStoreError::Io)?;
                Ok(next)
            }
            None => {
                let from = format!("{:?}", current.status);
                let to_label = format!("{to:?}");
                self.audit.record_anomaly(id, &from, &to_label).await.ok();
                Err(TaskStoreError::Conflict(ConflictError {
                    id: id.to_string(),
                    from,
                    to: to_label,
                }))
            }
        }
    }

    pub async fn approve(&self, id: &str) -> Result<TaskCard, TaskStoreError> {
        self.transition(id, Status::Approved, |_| {}).await
    }

    pub async fn dismiss(&self, id: &str, reason: String) -> Result<TaskCard, TaskStoreError> {
        self.transition(id, Status::Dismissed, |t| t.dismiss_reason = Some(reason))
            .await
    }

    pub async fn complete(&self, id: &str) -> Result<TaskCard, TaskStoreError> {
        self.transition(id, Status::Completed, |_| {}).await
    }

    pub async fn stats(&self) -> anyhow::Result<StoreStats> {
        let latest = self.read_latest_by_id().await?;
        let total = latest.len();
        let mut by_status = HashMap::new();
        let mut by_severity = HashMap::new();
        let mut by_type = HashMap::new();
        let mut priority_sum = 0.0;
        let mut confidence_sum = 0.0;

        for task in latest.values() {
            *by_status
                .entry(format!("{:?}", task.status).to_lowercase())
                .or_insert(0) += 1;
            *by_severity
                .entry(format!("{:?}", task.severity).to_lowercase())
                .or_insert(0) += 1;
            *by_type
                .entry(format!("{:?}", task.task_type).to_lowercase())
                .or_insert(0) += 1;
            priority_sum += task.priority as f64;
            confidence_sum += task.confidence;
        }

        Ok(StoreStats {
            total,
            by_status,
            by_severity,
            by_type,
            avg_priority: if total > 0 { priority_sum / total as f64 } else { 0.0 },
            avg_confidence: if total > 0 { confidence_sum / total as f64 } else { 0.0 },
        })
    }

    /// Rewrites the file once under the exclusive lock, dropping dismissed
    /// tasks whose `dismissedAt` predates `days_old`, streaming to a
    /// temporary file and atomically renaming it into place.
    pub async fn cleanup(&self, days_old: i64) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let latest = self.read_latest_by_id().await?;
        let cutoff = Utc::now() - chrono::Duration::days(days_old);

        let mut kept = Vec::new();
        let mut removed = 0usize;
        for task in latest.into_values() {
            let drop_it = task.status == Status::Dismissed
                && task.dismissed_at.map(|ts| ts < cutoff).unwrap_or(false);
            if drop_it {
                removed += 1;
            } else {
                kept.push(task);
            }
        }
        sort_tasks(&mut kept);

        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = tokio::fs::File::create(&tmp_path).await?;
            for task in &kept {
                let line = serde_json::to_string(task)?;
                tmp.write_all(line.as_bytes()).await?;
                tmp.write_all(b"\n").await?;
            }
            tmp.flush().await?;
        }
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(removed, "task store cleanup complete");
        drop(_guard);
        self.notify_changed();
        Ok(removed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("task store io error: {0}")]
    Io(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgt_core::task::{Evidence, Severity, SuggestedFix, TaskType};

    fn test_audit() -> Arc<AuditWriter> {
        AuditWriter::new(tempfile::tempdir().unwrap().keep()).unwrap()
    }

    fn sample(id: &str, title: &str) -> TaskCard {
        TaskCard {
            id: id.to_string(),
            task_type: TaskType::ContinuationIssue,
            severity: Severity::High,
            status: Status::Generated,
            title: title.to_string(),
            description: "d".into(),
            evidence: Evidence {
                summary: "s".into(),
                ..Default::default()
            },
            suggested_fix: SuggestedFix::default(),
            acceptance_criteria: vec!["x".into()],
            priority: 60,
            confidence: 0.8,
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
    async fn last_write_wins_per_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), test_audit()).unwrap();
        let mut task = sample("t1", "Investigate");
        store.save(&task).await.unwrap();
        task.priority = 99;
        store.save(&task).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.priority, 99);
    }

    #[tokio::test]
    async fn approve_then_complete_succeeds_reverse_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), test_audit()).unwrap();
        let task = sample("t1", "Investigate");
        store.save(&task).await.unwrap();

        store.approve("t1").await.unwrap();
        store.complete("t1").await.unwrap();
        let err = store.approve("t1").await;
        assert!(matches!(err, Err(TaskStoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn cleanup_drops_old_dismissed_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), test_audit()).unwrap();
        let mut old_dismissed = sample("old", "Old");
        old_dismissed.status = Status::Dismissed;
        old_dismissed.dismissed_at = Some(Utc::now() - chrono::Duration::days(40));
        store.save(&old_dismissed).await.unwrap();

        let active = sample("active", "Active");
        store.save(&active).await.unwrap();

        let removed = store.cleanup(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("active").await.unwrap().is_some());
    }
}
