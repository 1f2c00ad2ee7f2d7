//! ErrorSpikeAnalyzer (§4.3.2): detects a current error rate that spikes well
//! above the historical baseline.

use std::collections::HashMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::event::EventReader;
use crate::task::{
    compute_priority, generate_task_id, Evidence, Severity, Status, SuggestedFix, TaskCard,
    TaskType,
};

const MIN_CURRENT_ERRORS: usize = 5;

pub struct ErrorSpikeAnalyzer {
    pub multiplier: f64,
}

impl Default for ErrorSpikeAnalyzer {
    fn default() -> Self {
        Self { multiplier: 3.0 }
    }
}

impl Analyzer for ErrorSpikeAnalyzer {
    fn name(&self) -> &'static str {
        "error_spike"
    }

    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Vec<TaskCard> {
        let Some(baseline) = ctx.baselines.errors_per_hour.filter(|b| *b > 0.0) else {
            return Vec::new();
        };

        let errors: Vec<_> = ctx.events.iter().filter(|e| e.is_error()).collect();
        let current = errors.len();
        if current < MIN_CURRENT_ERRORS {
            return Vec::new();
        }

        let window_hours = (ctx.duration_ms as f64 / 3_600_000.0).max(1.0 / 60.0);
        let current_per_hour = current as f64 / window_hours;
        let observed_multiplier = current_per_hour / baseline;
        if observed_multiplier < self.multiplier {
            return Vec::new();
        }

        let severity = if observed_multiplier >= 5.0 {
            Severity::Critical
        } else if observed_multiplier >= 4.5 {
            Severity::High
        } else {
            Severity::Medium
        };
        let confidence = (0.65 + 0.1 * (observed_multiplier - self.multiplier)).min(0.95);

        let error_events: Vec<_> = errors.iter().map(|e| (*e).clone()).collect();
        let groups = EventReader::group_by(&error_events, |e| e.name.clone());
        let top = EventReader::top_n(&groups, 1);
        let (top_name, top_count) = top
            .into_iter()
            .next()
            .unwrap_or_else(|| ("unknown".to_string(), 0));

        let mut metrics = HashMap::new();
        metrics.insert("currentErrorsPerHour".to_string(), current_per_hour);
        metrics.insert("baselineErrorsPerHour".to_string(), baseline);
        metrics.insert("observedMultiplier".to_string(), observed_multiplier);
        metrics.insert("currentErrors".to_string(), current as f64);

        let evidence = Evidence {
            summary: format!(
                "Error rate is {:.1}x baseline ({:.1}/hr vs {:.1}/hr), top source {top_name}/{top_count}",
                observed_multiplier, current_per_hour, baseline
            ),
            details: vec![format!("top error source: {top_name} ({top_count} occurrences)")],
            metrics,
            samples: EventReader::samples(&errors.into_iter().cloned().collect::<Vec<_>>(), 5),
        };
        let priority = compute_priority(severity, confidence, &evidence);

        vec![TaskCard {
            id: generate_task_id(ctx.to, "error-spike"),
            task_type: TaskType::ErrorSpike,
            severity,
            status: Status::Generated,
            title: format!("Investigate {observed_multiplier:.1}x error spike: {top_name}"),
            description: format!(
                "The current error rate of {current_per_hour:.1}/hr is {observed_multiplier:.1}x the 7-day baseline of {baseline:.1}/hr, dominated by {top_name}."
            ),
            evidence,
            suggested_fix: SuggestedFix {
                approach: "root_cause_analysis".to_string(),
                files: Vec::new(),
                changes: vec![format!("Investigate failures in {top_name}")],
                estimated_effort: None,
            },
            acceptance_criteria: vec!["Error rate returns within baseline range".to_string()],
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

    fn error_event(name: &str) -> Event {
        Event {
            id: "e".into(),
            ts: Utc::now(),
            actor: Actor::System,
            act: "tool_call".into(),
            name: Some(name.into()),
            status: Some("error".into()),
            conv_id: None,
            trace_id: None,
            session_id: None,
            iter: None,
            elapsed_ms: None,
            finish_reason: None,
            content_preview: None,
            result_preview: None,
            args_preview: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn triggers_on_spike_above_baseline() {
        let mut events = vec![error_event("read_file"); 38];
        events.extend(vec![error_event("other"); 12]);
        let analyzer = ErrorSpikeAnalyzer::default();
        let now = Utc::now();
        let baselines = Baselines {
            errors_per_hour: Some(5.0),
            ..Default::default()
        };
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, baselines);
        let tasks = analyzer.analyze(&ctx);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].severity, Severity::Critical);
        assert!(tasks[0].title.contains("read_file"));
    }

    #[test]
    fn abstains_without_baseline() {
        let events = vec![error_event("x"); 50];
        let analyzer = ErrorSpikeAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        assert!(analyzer.analyze(&ctx).is_empty());
    }
}
