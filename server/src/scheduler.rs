//! The Scheduler (component C3's timer plus §4.5's pipeline): fires on an
//! interval, loads a telemetry window, runs the analyzer registry, and
//! writes survivors to the task store.
//!
//! Single-flight and rate-limiting are grounded on the same patterns the
//! teacher's own scheduler used for its monitoring ticks: an `is_running`
//! flag under a mutex, and a sliding window of timestamps for quota
//! enforcement.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tgt_core::analyzer::{AnalyzerContext, Baselines, Registry};
use tgt_core::analyzers::{
    ContinuationAnalyzer, DocsGapAnalyzer, ErrorSpikeAnalyzer, PerformanceAnalyzer, UxIssueAnalyzer,
};
use tgt_core::event::{BaselineMetric, EventReader};
use tgt_core::TgtConfig;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::AuditWriter;
use crate::broadcast::ChangeBroadcast;
use crate::docs::EnvDocumentationLookup;
use crate::store::TaskStore;

const BASELINE_WINDOW: StdDuration = StdDuration::from_secs(7 * 24 * 3600);
const RATE_LIMIT_WINDOW_MIN: i64 = 60;

/// Per-call overrides for `POST /tasks/suggest` (§6): any field left `None`
/// falls back to the configured default for that run only — the scheduler's
/// own config and rate-limit state are untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOverrides {
    pub window_minutes: Option<u64>,
    pub min_confidence: Option<f64>,
    pub max_tasks: Option<usize>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub total_runs: u64,
    pub total_generated: u64,
    pub total_saved: u64,
    pub total_errors: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<i64>,
    pub rate_limit_remaining: usize,
}

struct SchedulerState {
    is_running: bool,
    recent_saves: Vec<DateTime<Utc>>,
    stats: SchedulerStats,
}

pub struct Scheduler {
    config: TgtConfig,
    telemetry_dir: std::path::PathBuf,
    store: Arc<TaskStore>,
    audit: Arc<AuditWriter>,
    broadcast: Option<Arc<ChangeBroadcast>>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// `broadcast` is `None` for scheduler-only unit tests that have no
    /// change-fanout collaborator to wire in; production wiring always
    /// supplies one so a completed run with saves can emit a `notification`
    /// event to SSE subscribers.
    pub fn new(
        config: TgtConfig,
        telemetry_dir: impl Into<std::path::PathBuf>,
        store: Arc<TaskStore>,
        audit: Arc<AuditWriter>,
        broadcast: Option<Arc<ChangeBroadcast>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            telemetry_dir: telemetry_dir.into(),
            store,
            audit,
            broadcast,
            state: Mutex::new(SchedulerState {
                is_running: false,
                recent_saves: Vec::new(),
                stats: SchedulerStats::default(),
            }),
        })
    }

    /// Runs the background ticker until `shutdown` fires. Grounded on the
    /// teacher's `tokio::time::interval` + `select!` loop shape.
    pub async fn run_loop(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("task generation disabled, scheduler loop not starting");
            return;
        }
        let mut ticker = tokio::time::interval(StdDuration::from_secs(self.config.interval_min * 60));
        ticker.tick().await; // first tick fires immediately; skip it to avoid a double run at startup.

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(RunOverrides::default()).await {
                        warn!(error = %e, "scheduled task-generation run failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("scheduler loop shutting down");
                    break;
                }
            }
        }
    }

    /// Manual trigger (`POST /tasks/scheduler/run`); obeys the same
    /// single-flight and quota rules as the timer-driven path.
    pub async fn run_now(&self) -> anyhow::Result<usize> {
        self.run_once(RunOverrides::default()).await
    }

    /// On-demand trigger (`POST /tasks/suggest`) with per-call overrides.
    pub async fn run_now_with(&self, overrides: RunOverrides) -> anyhow::Result<usize> {
        self.run_once(overrides).await
    }

    pub async fn stats(&self) -> SchedulerStats {
        let mut state = self.state.lock().await;
        self.prune_rate_window(&mut state);
        state.stats.rate_limit_remaining = self
            .config
            .max_tasks_per_hour
            .saturating_sub(state.recent_saves.len());
        state.stats.clone()
    }

    fn prune_rate_window(&self, state: &mut SchedulerState) {
        let cutoff = Utc::now() - chrono::Duration::minutes(RATE_LIMIT_WINDOW_MIN);
        state.recent_saves.retain(|ts| *ts >= cutoff);
    }

    /// §4.5's seven-step pipeline. Returns the number of tasks saved.
    async fn run_once(&self, overrides: RunOverrides) -> anyhow::Result<usize> {
        {
            let mut state = self.state.lock().await;
            if state.is_running {
                info!("scheduler run already in flight, skipping");
                return Ok(0);
            }
            state.is_running = true;
        }

        let started = Utc::now();
        let result = self.execute_pipeline(overrides).await;
        let finished = Utc::now();

        let mut state = self.state.lock().await;
        state.is_running = false;
        state.stats.total_runs += 1;
        state.stats.last_run_at = Some(finished);
        state.stats.last_run_duration_ms = Some((finished - started).num_milliseconds());

        match &result {
            Ok((generated, saved)) => {
                state.stats.total_generated += *generated as u64;
                state.stats.total_saved += *saved as u64;
                self.audit
                    .record_run(
                        "scheduler_run",
                        "completed",
                        serde_json::json!({"generated": generated, "saved": saved}),
                    )
                    .await
                    .ok();
                if *saved > 0 {
                    if let Some(broadcast) = &self.broadcast {
                        broadcast.notify(format!("{saved} task(s) generated"));
                    }
                }
            }
            Err(e) => {
                state.stats.total_errors += 1;
                self.audit
                    .record_run("scheduler_run", "failed", serde_json::json!({"error": e.to_string()}))
                    .await
                    .ok();
            }
        }

        result.map(|(_, saved)| saved)
    }

    async fn execute_pipeline(&self, overrides: RunOverrides) -> anyhow::Result<(usize, usize)> {
        let window_min = overrides.window_minutes.unwrap_or(self.config.window_min);
        let min_confidence = overrides.min_confidence.unwrap_or(self.config.min_confidence);
        let max_tasks = overrides.max_tasks.unwrap_or(self.config.max_tasks);

        let to = Utc::now();
        let from = to - chrono::Duration::minutes(window_min as i64);
        let outcome = EventReader::load_between(&self.telemetry_dir, from, to)?;

        if outcome.events.is_empty() {
            return Ok((0, 0));
        }

        let baselines = Baselines {
            errors_per_hour: EventReader::baseline(&self.telemetry_dir, BaselineMetric::ErrorsPerHour, BASELINE_WINDOW),
            continuation_ratio: EventReader::baseline(&self.telemetry_dir, BaselineMetric::ContinuationRatio, BASELINE_WINDOW),
            avg_latency_ms: EventReader::baseline(&self.telemetry_dir, BaselineMetric::AvgLatencyMs, BASELINE_WINDOW),
            p95_latency_ms: EventReader::baseline(&self.telemetry_dir, BaselineMetric::P95LatencyMs, BASELINE_WINDOW),
        };

        let ctx = AnalyzerContext::new(&outcome.events, from, to, baselines);
        let registry = self.build_registry();
        let (generated, _outcomes) = registry.run(&ctx).await;
        let generated_count = generated.len();

        let confident: Vec<_> = generated
            .into_iter()
            .filter(|t| t.confidence >= min_confidence)
            .collect();

        let active_titles: HashSet<String> = self.store.active_titles().await?;
        let deduped: Vec<_> = confident
            .into_iter()
            .filter(|t| !active_titles.contains(&t.title))
            .take(max_tasks)
            .collect();

        let mut state = self.state.lock().await;
        self.prune_rate_window(&mut state);
        let mut quota_remaining = self
            .config
            .max_tasks_per_hour
            .saturating_sub(state.recent_saves.len());
        drop(state);

        let mut saved = 0usize;
        for task in deduped {
            if quota_remaining == 0 {
                break;
            }
            self.store.save(&task).await?;
            saved += 1;
            quota_remaining -= 1;

            let mut state = self.state.lock().await;
            state.recent_saves.push(Utc::now());
        }

        Ok((generated_count, saved))
    }

    fn build_registry(&self) -> Registry {
        let documentation = Box::new(EnvDocumentationLookup::new(self.config.documented_tools.clone()));
        Registry::new(vec![
            Box::new(ContinuationAnalyzer {
                threshold: self.config.continuation_threshold,
            }),
            Box::new(ErrorSpikeAnalyzer {
                multiplier: self.config.error_spike_multiplier,
            }),
            Box::new(DocsGapAnalyzer {
                min_usage: self.config.docs_gap_min_usage,
                documentation,
            }),
            Box::new(PerformanceAnalyzer {
                threshold_ratio: self.config.performance_threshold,
            }),
            Box::new(UxIssueAnalyzer {
                abort_threshold: self.config.ux_abort_threshold,
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_audit() -> Arc<AuditWriter> {
        AuditWriter::new(tempfile::tempdir().unwrap().keep()).unwrap()
    }

    #[tokio::test]
    async fn empty_telemetry_window_saves_nothing() {
        let telemetry_dir = tempfile::tempdir().unwrap();
        let tasks_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();

        let store = TaskStore::new(tasks_dir.path(), test_audit()).unwrap();
        let audit = AuditWriter::new(log_dir.path()).unwrap();
        let scheduler = Scheduler::new(TgtConfig::default(), telemetry_dir.path(), store, audit, None);

        let saved = scheduler.run_now().await.unwrap();
        assert_eq!(saved, 0);
        assert_eq!(scheduler.stats().await.total_runs, 1);
    }

    #[tokio::test]
    async fn concurrent_runs_single_flight() {
        let telemetry_dir = tempfile::tempdir().unwrap();
        let tasks_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();

        let store = TaskStore::new(tasks_dir.path(), test_audit()).unwrap();
        let audit = AuditWriter::new(log_dir.path()).unwrap();
        let scheduler = Scheduler::new(TgtConfig::default(), telemetry_dir.path(), store, audit, None);

        {
            let mut state = scheduler.state.lock().await;
            state.is_running = true;
        }
        let saved = scheduler.run_now().await.unwrap();
        assert_eq!(saved, 0);
    }
}
