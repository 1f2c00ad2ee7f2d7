//! Configuration loading for the task generator server.
//!
//! Unlike the rest of this codebase's lineage, which loads a `server.toml`
//! file, every variable this system exposes is environment-driven (§6), so
//! `ConfigManager` reads `std::env` instead of parsing a config file.

use std::env;

use tgt_core::TgtConfig;
use tracing::{debug, info};

/// Loads and logs the environment-driven configuration.
pub struct ConfigManager;

impl ConfigManager {
    /// Reads every `TASKGEN_*` / `FGK_*` variable, falling back to
    /// [`TgtConfig::default`] for anything unset or unparseable.
    pub fn load() -> TgtConfig {
        let defaults = TgtConfig::default();

        let config = TgtConfig {
            enabled: env_bool("TASKGEN_ENABLED", defaults.enabled),
            interval_min: env_u64("TASKGEN_INTERVAL_MIN", defaults.interval_min),
            window_min: env_u64("TASKGEN_WINDOW_MIN", defaults.window_min),
            min_confidence: env_f64("TASKGEN_MIN_CONFIDENCE", defaults.min_confidence),
            max_tasks: env_usize("TASKGEN_MAX_TASKS", defaults.max_tasks),
            max_tasks_per_hour: env_usize("TASKGEN_MAX_PER_HOUR", defaults.max_tasks_per_hour),

            continuation_threshold: env_f64(
                "TASKGEN_CONTINUATION_THRESHOLD",
                defaults.continuation_threshold,
            ),
            error_spike_multiplier: env_f64(
                "TASKGEN_ERROR_SPIKE_MULTIPLIER",
                defaults.error_spike_multiplier,
            ),
            docs_gap_min_usage: env_u64("TASKGEN_DOCS_GAP_MIN_USAGE", defaults.docs_gap_min_usage),
            performance_threshold: env_f64(
                "TASKGEN_PERFORMANCE_THRESHOLD",
                defaults.performance_threshold,
            ),
            ux_abort_threshold: env_f64("TASKGEN_UX_ABORT_THRESHOLD", defaults.ux_abort_threshold),

            auto_approve: env_bool("TASKGEN_AUTO_APPROVE", defaults.auto_approve),
            auto_approve_confidence: env_f64(
                "TASKGEN_AUTO_APPROVE_CONFIDENCE",
                defaults.auto_approve_confidence,
            ),
            auto_approve_analyzers: env_csv(
                "TASKGEN_AUTO_APPROVE_ANALYZERS",
                &defaults.auto_approve_analyzers,
            ),
            auto_approve_max_per_hour: env_usize(
                "TASKGEN_AUTO_APPROVE_MAX_PER_HOUR",
                defaults.auto_approve_max_per_hour,
            ),

            watch_debounce_ms: env_u64("TASKGEN_WATCH_DEBOUNCE_MS", defaults.watch_debounce_ms),

            tasks_dir: env::var("FGK_TASKS_DIR").unwrap_or(defaults.tasks_dir),
            contextlog_dir: env::var("FGK_CONTEXTLOG_DIR").unwrap_or(defaults.contextlog_dir),
            documented_tools: env_csv("TASKGEN_DOCUMENTED_TOOLS", &defaults.documented_tools),
        };

        debug!(
            enabled = config.enabled,
            interval_min = config.interval_min,
            window_min = config.window_min,
            min_confidence = config.min_confidence,
            max_tasks = config.max_tasks,
            max_tasks_per_hour = config.max_tasks_per_hour,
            auto_approve = config.auto_approve,
            tasks_dir = %config.tasks_dir,
            contextlog_dir = %config.contextlog_dir,
            "task generator configuration loaded"
        );
        info!(
            interval_min = config.interval_min,
            window_min = config.window_min,
            "scheduler timing configured"
        );

        config
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str, default: &[String]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            v.split(',').map(|s| s.trim().to_string()).collect()
        }
        _ => default.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_csv_falls_back_to_default() {
        let default = vec!["a".to_string(), "b".to_string()];
        assert_eq!(env_csv("TASKGEN_TEST_UNSET_VAR", &default), default);
    }
}
