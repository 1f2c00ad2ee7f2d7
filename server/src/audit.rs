//! Audit emissions (§6): every scheduler run, auto-approval decision, and
//! anomaly is appended as a single JSON line back to `context_log`, in the
//! same hourly-file layout the telemetry reader consumes.
//!
//! TGT's own writes to this directory are system-authored audit records, not
//! a violation of "TGT is strictly a reader" (§1) — that constraint binds the
//! *host's* telemetry, which this writer never touches or rewrites.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Serializes writes to a single hourly file under the context log directory.
pub struct AuditWriter {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl AuditWriter {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(Self {
            dir,
            lock: Mutex::new(()),
        }))
    }

    fn current_file(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "ctx-{:04}{:02}{:02}{:02}.jsonl",
            now.year(),
            now.month(),
            now.day(),
            now.hour()
        ))
    }

    async fn append(&self, record: Value) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let path = self.current_file(now);
        let line = serde_json::to_string(&record)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Records a scheduler run's outcome.
    pub async fn record_run(&self, act: &str, status: &str, extra: Value) -> anyhow::Result<()> {
        let mut record = json!({
            "id": format!("audit-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            "ts": Utc::now().to_rfc3339(),
            "actor": "system",
            "act": act,
            "status": status,
        });
        merge(&mut record, extra);
        debug!(act, status, "audit: scheduler run recorded");
        self.append(record).await
    }

    /// Records an auto-approval decision (eligible or not) with its rationale.
    pub async fn record_auto_approval(&self, task_id: &str, approved: bool, rationale: &str) -> anyhow::Result<()> {
        let record = json!({
            "id": format!("audit-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            "ts": Utc::now().to_rfc3339(),
            "actor": "system",
            "act": "auto_approval_decision",
            "status": if approved { "approved" } else { "declined" },
            "taskId": task_id,
            "rationale": rationale,
        });
        self.append(record).await
    }

    /// Records an I2 reverse-transition anomaly.
    pub async fn record_anomaly(&self, task_id: &str, from: &str, to: &str) -> anyhow::Result<()> {
        let record = json!({
            "id": format!("audit-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            "ts": Utc::now().to_rfc3339(),
            "actor": "system",
            "act": "illegal_transition",
            "status": "anomaly",
            "taskId": task_id,
            "from": from,
            "to": to,
        });
        self.append(record).await
    }
}

fn merge(base: &mut Value, extra: Value) {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) {
        for (k, v) in extra_map {
            base_map.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_a_parseable_line() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(dir.path()).unwrap();
        writer
            .record_run("scheduler_run", "completed", json!({"tasksSaved": 3}))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let content = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        let parsed: Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["act"], "scheduler_run");
        assert_eq!(parsed["tasksSaved"], 3);
    }
}
