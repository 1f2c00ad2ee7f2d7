//! Environment-driven configuration shared by every TGT component (§6).
//!
//! `tgt-server` owns loading this from the process environment; `tgt-core`
//! only defines the shape and defaults so analyzers and the task model can
//! depend on it without depending on the server's I/O.

use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}
fn default_interval_min() -> u64 {
    15
}
fn default_window_min() -> u64 {
    60
}
fn default_min_confidence() -> f64 {
    0.0
}
fn default_max_tasks() -> usize {
    20
}
fn default_max_per_hour() -> usize {
    10
}
fn default_continuation_threshold() -> f64 {
    0.15
}
fn default_error_spike_multiplier() -> f64 {
    3.0
}
fn default_docs_gap_min_usage() -> u64 {
    20
}
fn default_performance_threshold() -> f64 {
    1.5
}
fn default_ux_abort_threshold() -> f64 {
    0.20
}
fn default_auto_approve() -> bool {
    false
}
fn default_auto_approve_confidence() -> f64 {
    0.90
}
fn default_auto_approve_analyzers() -> Vec<String> {
    vec!["continuation".to_string(), "error_spike".to_string()]
}
fn default_auto_approve_max_per_hour() -> usize {
    5
}
fn default_watch_debounce_ms() -> u64 {
    500
}
fn default_tasks_dir() -> String {
    "tasks".to_string()
}
fn default_contextlog_dir() -> String {
    "context_log".to_string()
}
fn default_documented_tools() -> Vec<String> {
    Vec::new()
}

/// Mirrors the configuration table in §6. Every field documents the env var
/// it is read from on the server side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TgtConfig {
    /// `TASKGEN_ENABLED`
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `TASKGEN_INTERVAL_MIN`
    #[serde(default = "default_interval_min")]
    pub interval_min: u64,
    /// `TASKGEN_WINDOW_MIN`
    #[serde(default = "default_window_min")]
    pub window_min: u64,
    /// `TASKGEN_MIN_CONFIDENCE`
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// `TASKGEN_MAX_TASKS`
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// `TASKGEN_MAX_PER_HOUR`
    #[serde(default = "default_max_per_hour")]
    pub max_tasks_per_hour: usize,

    /// `TASKGEN_CONTINUATION_THRESHOLD`
    #[serde(default = "default_continuation_threshold")]
    pub continuation_threshold: f64,
    /// `TASKGEN_ERROR_SPIKE_MULTIPLIER`
    #[serde(default = "default_error_spike_multiplier")]
    pub error_spike_multiplier: f64,
    /// `TASKGEN_DOCS_GAP_MIN_USAGE`
    #[serde(default = "default_docs_gap_min_usage")]
    pub docs_gap_min_usage: u64,
    /// `TASKGEN_PERFORMANCE_THRESHOLD`
    #[serde(default = "default_performance_threshold")]
    pub performance_threshold: f64,
    /// `TASKGEN_UX_ABORT_THRESHOLD`
    #[serde(default = "default_ux_abort_threshold")]
    pub ux_abort_threshold: f64,

    /// `TASKGEN_AUTO_APPROVE`
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,
    /// `TASKGEN_AUTO_APPROVE_CONFIDENCE`
    #[serde(default = "default_auto_approve_confidence")]
    pub auto_approve_confidence: f64,
    /// `TASKGEN_AUTO_APPROVE_ANALYZERS`
    #[serde(default = "default_auto_approve_analyzers")]
    pub auto_approve_analyzers: Vec<String>,
    /// `TASKGEN_AUTO_APPROVE_MAX_PER_HOUR`
    #[serde(default = "default_auto_approve_max_per_hour")]
    pub auto_approve_max_per_hour: usize,

    /// Not in the original table — resolves Open Question #2 by making the
    /// broadcast file-watcher debounce configurable instead of hardcoded.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// `FGK_TASKS_DIR`
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: String,
    /// `FGK_CONTEXTLOG_DIR`
    #[serde(default = "default_contextlog_dir")]
    pub contextlog_dir: String,

    /// Not in the original table — the documentation predicate DocsGapAnalyzer
    /// needs is an external collaborator's contract (§1's out-of-scope host);
    /// `TASKGEN_DOCUMENTED_TOOLS` (comma-separated) is the simplest faithful
    /// wiring of that contract without inventing a docs service.
    #[serde(default = "default_documented_tools")]
    pub documented_tools: Vec<String>,
}

impl Default for TgtConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_min: default_interval_min(),
            window_min: default_window_min(),
            min_confidence: default_min_confidence(),
            max_tasks: default_max_tasks(),
            max_tasks_per_hour: default_max_per_hour(),
            continuation_threshold: default_continuation_threshold(),
            error_spike_multiplier: default_error_spike_multiplier(),
            docs_gap_min_usage: default_docs_gap_min_usage(),
            performance_threshold: default_performance_threshold(),
            ux_abort_threshold: default_ux_abort_threshold(),
            auto_approve: default_auto_approve(),
            auto_approve_confidence: default_auto_approve_confidence(),
            auto_approve_analyzers: default_auto_approve_analyzers(),
            auto_approve_max_per_hour: default_auto_approve_max_per_hour(),
            watch_debounce_ms: default_watch_debounce_ms(),
            tasks_dir: default_tasks_dir(),
            contextlog_dir: default_contextlog_dir(),
            documented_tools: default_documented_tools(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = TgtConfig::default();
        assert_eq!(cfg.interval_min, 15);
        assert_eq!(cfg.max_tasks_per_hour, 10);
        assert!(!cfg.auto_approve);
        assert_eq!(cfg.auto_approve_max_per_hour, 5);
    }
}
