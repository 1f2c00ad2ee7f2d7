//! PerformanceAnalyzer (§4.3.4): compares current p95 latency to a 7-day
//! baseline and identifies the bottleneck operation.

use std::collections::HashMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::event::EventReader;
use crate::task::{
    compute_priority, generate_task_id, Evidence, Severity, Status, SuggestedFix, TaskCard,
    TaskType,
};

const MIN_SAMPLE: usize = 20;
/// Events above this percentile are considered the "slow tail" for
/// bottleneck-group identification.
const SLOW_TAIL_PERCENTILE: f64 = 90.0;

pub struct PerformanceAnalyzer {
    pub threshold_ratio: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self { threshold_ratio: 1.5 }
    }
}

impl Analyzer for PerformanceAnalyzer {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Vec<TaskCard> {
        let timed: Vec<_> = ctx
            .events
            .iter()
            .filter(|e| e.elapsed_ms.is_some())
            .cloned()
            .collect();
        if timed.len() < MIN_SAMPLE {
            return Vec::new();
        }
        let Some(baseline_p95) = ctx.baselines.p95_latency_ms.filter(|b| *b > 0.0) else {
            return Vec::new();
        };

        let p50 = EventReader::percentile(&timed, |e| e.elapsed_ms, 50.0);
        let p95 = EventReader::percentile(&timed, |e| e.elapsed_ms, 95.0);
        let p99 = EventReader::percentile(&timed, |e| e.elapsed_ms, 99.0);
        let avg = EventReader::average(&timed, |e| e.elapsed_ms);

        let ratio = p95 / baseline_p95;
        if ratio < self.threshold_ratio {
            return Vec::new();
        }

        let severity = if ratio >= 2.0 {
            Severity::Critical
        } else if ratio >= 1.95 {
            Severity::High
        } else {
            Severity::Medium
        };
        let confidence = (0.70 + 0.1 * (ratio - self.threshold_ratio)).min(0.95);

        let slow_tail_cutoff = EventReader::percentile(&timed, |e| e.elapsed_ms, SLOW_TAIL_PERCENTILE);
        let slow_tail: Vec<_> = timed
            .iter()
            .filter(|e| e.elapsed_ms.unwrap_or(0.0) >= slow_tail_cutoff)
            .cloned()
            .collect();
        let groups = EventReader::group_by(&slow_tail, |e| Some(e.act.clone()));
        let top = EventReader::top_n(&groups, 1);
        let (bottleneck, bottleneck_count) = top
            .into_iter()
            .next()
            .unwrap_or_else(|| ("unknown".to_string(), 0));

        let mut metrics = HashMap::new();
        metrics.insert("p50".to_string(), p50);
        metrics.insert("p95".to_string(), p95);
        metrics.insert("p99".to_string(), p99);
        metrics.insert("avg".to_string(), avg);
        metrics.insert("baselineP95".to_string(), baseline_p95);
        metrics.insert("ratio".to_string(), ratio);

        let evidence = Evidence {
            summary: format!(
                "p95 latency {p95:.0}ms is {ratio:.2}x the 7-day baseline of {baseline_p95:.0}ms, bottleneck: {bottleneck}"
            ),
            details: vec![format!("{bottleneck_count} of the slowest events are {bottleneck}")],
            metrics,
            samples: EventReader::samples(&slow_tail, 5),
        };
        let priority = compute_priority(severity, confidence, &evidence);

        vec![TaskCard {
            id: generate_task_id(ctx.to, "performance-degradation"),
            task_type: TaskType::PerformanceDegradation,
            severity,
            status: Status::Generated,
            title: format!("Reduce latency regression in {bottleneck}"),
            description: format!(
                "p95 latency has regressed to {p95:.0}ms ({ratio:.2}x the 7-day baseline of {baseline_p95:.0}ms), concentrated in {bottleneck}."
            ),
            evidence,
            suggested_fix: SuggestedFix {
                approach: "performance_tuning".to_string(),
                files: Vec::new(),
                changes: vec![format!("Profile and optimize {bottleneck}")],
                estimated_effort: None,
            },
            acceptance_criteria: vec!["p95 latency returns within 1.2x of baseline".to_string()],
            priority,
            confidence,
            analyzer: self.name().to_string(),
            generated_at: ctx.to,
            approved_at: None,
            dismissed_at: None,
            completed_at: None,
            dismiss_reason: None,
            metadata: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Baselines;
    use crate::event::{Actor, Event};
    use chrono::Utc;

    fn timed_event(act: &str, ms: f64) -> Event {
        Event {
            id: "e".into(),
            ts: Utc::now(),
            actor: Actor::Assistant,
            act: act.into(),
            name: None,
            status: Some("ok".into()),
            conv_id: None,
            trace_id: None,
            session_id: None,
            iter: None,
            elapsed_ms: Some(ms),
            finish_reason: None,
            content_preview: None,
            result_preview: None,
            args_preview: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn triggers_on_ratio_above_threshold() {
        let mut events: Vec<Event> = (0..30).map(|_| timed_event("respond", 100.0)).collect();
        events.extend((0..10).map(|_| timed_event("tool_call", 5000.0)));
        let baselines = Baselines {
            p95_latency_ms: Some(1000.0),
            ..Default::default()
        };
        let analyzer = PerformanceAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, baselines);
        let tasks = analyzer.analyze(&ctx);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].title.contains("tool_call"));
    }

    #[test]
    fn abstains_without_baseline() {
        let events: Vec<Event> = (0..30).map(|_| timed_event("respond", 100.0)).collect();
        let analyzer = PerformanceAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        assert!(analyzer.analyze(&ctx).is_empty());
    }
}
