//! Telemetry event model and the read-only interface over the telemetry
//! directory (component C1).
//!
//! Events are append-only per hour (`ctx-YYYYMMDDHH.jsonl`). This module never
//! writes to that directory — TGT is strictly a reader, per spec §1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EventReadError;

/// Who performed the action that generated the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Assistant,
    System,
    Autonomous,
}

/// A single telemetry event. `extra` carries every field analyzers don't name
/// explicitly — per REDESIGN FLAGS, analyzers declare the fields they consume
/// rather than treating events as unshaped maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub actor: Actor,
    pub act: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conv_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub iter: Option<u64>,
    #[serde(default)]
    pub elapsed_ms: Option<f64>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub result_preview: Option<String>,
    #[serde(default)]
    pub args_preview: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn is_error(&self) -> bool {
        matches!(self.status.as_deref(), Some("error"))
    }
}

/// A conjunctive filter criterion for [`EventReader::filter`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub act: Option<String>,
    pub actor: Option<Actor>,
    pub status: Option<String>,
    pub name: Option<String>,
    pub conv_id: Option<String>,
    pub session_id: Option<String>,
}

impl EventFilter {
    fn matches(&self, e: &Event) -> bool {
        if let Some(act) = &self.act {
            if &e.act != act {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if e.actor != *actor {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if e.status.as_deref() != Some(status.as_str()) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if e.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(conv_id) = &self.conv_id {
            if e.conv_id.as_deref() != Some(conv_id.as_str()) {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if e.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Outcome of a [`EventReader::load`] call: the sorted events plus a count of
/// lines that failed to parse (counted, never thrown — see `CorruptLine`).
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub events: Vec<Event>,
    pub corrupt_lines: u64,
}

/// Pure, I/O-bounded read interface over the telemetry directory.
pub struct EventReader;

impl EventReader {
    /// Loads the minimum set of hourly files whose ranges intersect
    /// `[now - window, now]`, sorted by `ts` ascending.
    pub fn load(dir: &Path, window: Duration) -> Result<LoadOutcome, EventReadError> {
        let now = Utc::now();
        let start = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        Self::load_between(dir, start, now)
    }

    /// Same as [`Self::load`] but with an explicit `[from, to]` bound — used
    /// by baseline computation to load an arbitrary historical window.
    pub fn load_between(
        dir: &Path,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LoadOutcome, EventReadError> {
        if !dir.exists() {
            return Err(EventReadError::DirNotFound(dir.to_path_buf()));
        }

        let mut outcome = LoadOutcome::default();
        for path in Self::hourly_files_in_range(dir, from, to)? {
            Self::stream_file(&path, from, &mut outcome)?;
        }
        outcome.events.sort_by_key(|e| e.ts);
        Ok(outcome)
    }

    /// Enumerates `ctx-YYYYMMDDHH.jsonl` files whose hour bucket intersects
    /// `[from, to]`. Computed directly from the timestamps rather than
    /// listing the directory, so I/O is bounded by the window, not by how
    /// much history exists on disk.
    fn hourly_files_in_range(
        dir: &Path,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>, EventReadError> {
        let mut paths = Vec::new();
        let mut cursor = from
            .with_minute(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(from);

        while cursor <= to {
            let name = format!(
                "ctx-{:04}{:02}{:02}{:02}.jsonl",
                cursor.year(),
                cursor.month(),
                cursor.day(),
                cursor.hour()
            );
            let path = dir.join(name);
            if path.exists() {
                paths.push(path);
            }
            cursor += chrono::Duration::hours(1);
        }
        Ok(paths)
    }

    /// Streams one file line by line, discarding malformed lines (counted,
    /// never aborting the load) and stopping once a line's timestamp falls
    /// before `window_start`, bounding I/O per spec §4.1.
    fn stream_file(
        path: &Path,
        window_start: DateTime<Utc>,
        outcome: &mut LoadOutcome,
    ) -> Result<(), EventReadError> {
        use std::io::{BufRead, BufReader};

        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(EventReadError::PermissionDenied(path.to_path_buf()));
            }
            Err(e) => return Err(EventReadError::Io(e)),
        };
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line.map_err(EventReadError::Io)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    if event.ts < window_start {
                        continue;
                    }
                    outcome.events.push(event);
                }
                Err(e) => {
                    outcome.corrupt_lines += 1;
                    debug!(path = %path.display(), error = %e, "discarding corrupt telemetry line");
                }
            }
        }
        Ok(())
    }

    /// Filters events by a conjunctive criterion.
    pub fn filter<'a>(events: &'a [Event], criterion: &EventFilter) -> Vec<&'a Event> {
        events.iter().filter(|e| criterion.matches(e)).collect()
    }

    /// Groups events by an extractor function, preserving per-group insertion
    /// order (stable grouping).
    pub fn group_by<'a, F>(events: &'a [Event], mut key_of: F) -> HashMap<String, Vec<&'a Event>>
    where
        F: FnMut(&'a Event) -> Option<String>,
    {
        let mut groups: HashMap<String, Vec<&'a Event>> = HashMap::new();
        for event in events {
            if let Some(key) = key_of(event) {
                groups.entry(key).or_default().push(event);
            }
        }
        groups
    }

    /// Nearest-rank percentile over `field_of(event)` values. `p` must be in
    /// (0, 100). Returns 0.0 for empty input.
    pub fn percentile<F>(events: &[Event], field_of: F, p: f64) -> f64
    where
        F: Fn(&Event) -> Option<f64>,
    {
        let mut values: Vec<f64> = events.iter().filter_map(field_of).collect();
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((p / 100.0) * values.len() as f64).ceil() as usize;
        let idx = rank.saturating_sub(1).min(values.len() - 1);
        values[idx]
    }

    /// Arithmetic mean of `field_of(event)` values, 0.0 for empty input.
    pub fn average<F>(events: &[Event], field_of: F) -> f64
    where
        F: Fn(&Event) -> Option<f64>,
    {
        let values: Vec<f64> = events.iter().filter_map(field_of).collect();
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Returns up to `n` groups ranked by descending member count.
    pub fn top_n(
        groups: &HashMap<String, Vec<&Event>>,
        n: usize,
    ) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> =
            groups.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }

    /// Returns up to `n` raw event snippets (content/result/args previews),
    /// used to populate `evidence.samples`.
    pub fn samples(events: &[Event], n: usize) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| {
                e.content_preview
                    .clone()
                    .or_else(|| e.result_preview.clone())
                    .or_else(|| e.args_preview.clone())
            })
            .take(n)
            .collect()
    }

    /// Computes a historical baseline metric over `window` (default 7 days).
    /// Streams the historical window per file rather than holding it all in
    /// memory at once, per spec's memory-bound requirement.
    pub fn baseline(dir: &Path, metric: BaselineMetric, window: Duration) -> Option<f64> {
        let now = Utc::now();
        let from = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let outcome = Self::load_between(dir, from, now).ok()?;
        if outcome.events.is_empty() {
            return None;
        }

        let hours = window.as_secs_f64() / 3600.0;
        match metric {
            BaselineMetric::ErrorsPerHour => {
                let errors = outcome.events.iter().filter(|e| e.is_error()).count();
                Some(errors as f64 / hours.max(1.0))
            }
            BaselineMetric::ContinuationRatio => {
                let responses: Vec<&Event> = outcome
                    .events
                    .iter()
                    .filter(|e| e.actor == Actor::Assistant && e.finish_reason.is_some())
                    .collect();
                if responses.is_empty() {
                    return None;
                }
                let continuations = responses
                    .iter()
                    .filter(|e| e.finish_reason.as_deref() == Some("length"))
                    .count();
                Some(continuations as f64 / responses.len() as f64)
            }
            BaselineMetric::AvgLatencyMs => {
                let avg = Self::average(&outcome.events, |e| e.elapsed_ms);
                if avg == 0.0 {
                    None
                } else {
                    Some(avg)
                }
            }
            BaselineMetric::P95LatencyMs => {
                let timed: Vec<Event> = outcome
                    .events
                    .iter()
                    .filter(|e| e.elapsed_ms.is_some())
                    .cloned()
                    .collect();
                if timed.is_empty() {
                    None
                } else {
                    Some(Self::percentile(&timed, |e| e.elapsed_ms, 95.0))
                }
            }
        }
    }
}

/// The historical aggregate metrics `EventReader::baseline` can compute.
#[derive(Debug, Clone, Copy)]
pub enum BaselineMetric {
    ErrorsPerHour,
    ContinuationRatio,
    AvgLatencyMs,
    P95LatencyMs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_hour_file(dir: &Path, hour: DateTime<Utc>, lines: &[&str]) {
        let name = format!(
            "ctx-{:04}{:02}{:02}{:02}.jsonl",
            hour.year(),
            hour.month(),
            hour.day(),
            hour.hour()
        );
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    fn event_json(ts: DateTime<Utc>, act: &str, status: Option<&str>) -> String {
        serde_json::json!({
            "id": format!("e-{}", ts.timestamp_nanos_opt().unwrap_or(0)),
            "ts": ts.to_rfc3339(),
            "actor": "assistant",
            "act": act,
            "status": status,
        })
        .to_string()
    }

    #[test]
    fn load_sorts_and_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let e1 = event_json(now - chrono::Duration::minutes(5), "respond", Some("ok"));
        let e2 = event_json(now - chrono::Duration::minutes(1), "respond", Some("ok"));
        write_hour_file(dir.path(), now, &[&e2, "not json", &e1]);

        let outcome = EventReader::load(dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(outcome.corrupt_lines, 1);
        assert_eq!(outcome.events.len(), 2);
        assert!(outcome.events[0].ts <= outcome.events[1].ts);
    }

    #[test]
    fn load_missing_dir_errors() {
        let err = EventReader::load(Path::new("/nonexistent/tgt-dir"), Duration::from_secs(60));
        assert!(matches!(err, Err(EventReadError::DirNotFound(_))));
    }

    #[test]
    fn percentile_empty_is_zero() {
        assert_eq!(EventReader::percentile(&[], |e| e.elapsed_ms, 95.0), 0.0);
    }

    #[test]
    fn percentile_nearest_rank() {
        let now = Utc::now();
        let events: Vec<Event> = [10.0, 20.0, 30.0, 40.0, 50.0]
            .iter()
            .map(|ms| Event {
                id: "e".into(),
                ts: now,
                actor: Actor::Assistant,
                act: "respond".into(),
                name: None,
                status: None,
                conv_id: None,
                trace_id: None,
                session_id: None,
                iter: None,
                elapsed_ms: Some(*ms),
                finish_reason: None,
                content_preview: None,
                result_preview: None,
                args_preview: None,
                extra: Default::default(),
            })
            .collect();
        assert_eq!(EventReader::percentile(&events, |e| e.elapsed_ms, 50.0), 30.0);
    }
}
