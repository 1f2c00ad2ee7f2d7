//! UXIssueAnalyzer (§4.3.5): groups events by conversation and emits up to
//! three independent tasks for distinct frustration patterns.

use std::collections::HashMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::event::{Event, EventReader};
use crate::task::{
    compute_priority, generate_task_id, Evidence, Severity, Status, SuggestedFix, TaskCard,
    TaskType,
};

const MIN_CONVERSATIONS: usize = 10;
const LONG_WAIT_MS: f64 = 8_000.0;

pub struct UxIssueAnalyzer {
    pub abort_threshold: f64,
}

impl Default for UxIssueAnalyzer {
    fn default() -> Self {
        Self { abort_threshold: 0.20 }
    }
}

struct ConversationSummary {
    completed: bool,
    has_long_wait: bool,
    error_ratio: f64,
}

fn summarize(events: &[&Event]) -> ConversationSummary {
    let completed = events
        .iter()
        .any(|e| e.status.as_deref() == Some("ok") && e.act == "complete");
    let has_long_wait = events.iter().any(|e| e.elapsed_ms.unwrap_or(0.0) > LONG_WAIT_MS);
    let errors = events.iter().filter(|e| e.is_error()).count();
    let error_ratio = if events.is_empty() {
        0.0
    } else {
        errors as f64 / events.len() as f64
    };
    ConversationSummary {
        completed,
        has_long_wait,
        error_ratio,
    }
}

fn make_task(
    ctx: &AnalyzerContext<'_>,
    analyzer_name: &str,
    seed: &str,
    title: String,
    description: String,
    rate: f64,
    threshold: f64,
    metric_name: &str,
    acceptance: &str,
) -> TaskCard {
    let severity = if rate > 0.40 {
        Severity::Critical
    } else if rate > 0.25 {
        Severity::High
    } else {
        Severity::Medium
    };
    let confidence = (0.70 + 1.5 * (rate - threshold)).clamp(0.0, 0.95);

    let mut metrics = HashMap::new();
    metrics.insert(metric_name.to_string(), rate);
    metrics.insert("threshold".to_string(), threshold);

    let evidence = Evidence {
        summary: description.clone(),
        details: Vec::new(),
        metrics,
        samples: Vec::new(),
    };
    let priority = compute_priority(severity, confidence, &evidence);

    TaskCard {
        id: generate_task_id(ctx.to, seed),
        task_type: TaskType::UxIssue,
        severity,
        status: Status::Generated,
        title,
        description,
        evidence,
        suggested_fix: SuggestedFix {
            approach: "ux_review".to_string(),
            files: Vec::new(),
            changes: Vec::new(),
            estimated_effort: None,
        },
        acceptance_criteria: vec![acceptance.to_string()],
        priority,
        confidence,
        analyzer: analyzer_name.to_string(),
        generated_at: ctx.to,
        approved_at: None,
        dismissed_at: None,
        completed_at: None,
        dismiss_reason: None,
        metadata: None,
    }
}

impl Analyzer for UxIssueAnalyzer {
    fn name(&self) -> &'static str {
        "ux_issue"
    }

    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Vec<TaskCard> {
        let owned: Vec<Event> = ctx
            .events
            .iter()
            .filter(|e| e.conv_id.is_some())
            .cloned()
            .collect();
        let groups = EventReader::group_by(&owned, |e| e.conv_id.clone());
        let total = groups.len();
        if total < MIN_CONVERSATIONS {
            return Vec::new();
        }

        let summaries: Vec<ConversationSummary> =
            groups.values().map(|events| summarize(events)).collect();

        let mut tasks = Vec::new();

        let aborted = summaries.iter().filter(|s| !s.completed).count();
        let abort_rate = aborted as f64 / total as f64;
        if abort_rate > self.abort_threshold {
            tasks.push(make_task(
                ctx,
                self.name(),
                "ux-abort",
                "Improve conversation completion rate".to_string(),
                format!(
                    "{:.0}% of conversations ({aborted}/{total}) end without a successful completion",
                    abort_rate * 100.0
                ),
                abort_rate,
                self.abort_threshold,
                "abortRate",
                "Abort rate reduced below threshold",
            ));
        }

        let long_wait_count = summaries.iter().filter(|s| s.has_long_wait).count();
        let long_wait_rate = long_wait_count as f64 / total as f64;
        if long_wait_rate > 0.15 {
            tasks.push(make_task(
                ctx,
                self.name(),
                "ux-long-wait",
                "Reduce conversations with long waits".to_string(),
                format!(
                    "{:.0}% of conversations ({long_wait_count}/{total}) contain a wait over {:.0}s",
                    long_wait_rate * 100.0,
                    LONG_WAIT_MS / 1000.0
                ),
                long_wait_rate,
                0.15,
                "longWaitRate",
                "Long-wait conversation rate reduced below threshold",
            ));
        }

        let high_error_count = summaries.iter().filter(|s| s.error_ratio > 0.30).count();
        let high_error_rate = high_error_count as f64 / total as f64;
        if high_error_rate > 0.25 {
            tasks.push(make_task(
                ctx,
                self.name(),
                "ux-high-error",
                "Reduce conversations with high error ratio".to_string(),
                format!(
                    "{:.0}% of conversations ({high_error_count}/{total}) have an error ratio above 30%",
                    high_error_rate * 100.0
                ),
                high_error_rate,
                0.25,
                "highErrorConversationRate",
                "High-error conversation rate reduced below threshold",
            ));
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Baselines;
    use crate::event::Actor;
    use chrono::Utc;

    fn event(conv_id: &str, act: &str, status: &str, elapsed_ms: Option<f64>) -> Event {
        Event {
            id: "e".into(),
            ts: Utc::now(),
            actor: Actor::Assistant,
            act: act.into(),
            name: None,
            status: Some(status.into()),
            conv_id: Some(conv_id.into()),
            trace_id: None,
            session_id: None,
            iter: None,
            elapsed_ms,
            finish_reason: None,
            content_preview: None,
            result_preview: None,
            args_preview: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn flags_high_abort_rate() {
        let mut events = Vec::new();
        for i in 0..10 {
            let conv = format!("c{i}");
            if i < 5 {
                events.push(event(&conv, "complete", "ok", None));
            } else {
                events.push(event(&conv, "respond", "ok", None));
            }
        }
        let analyzer = UxIssueAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        let tasks = analyzer.analyze(&ctx);
        assert!(tasks.iter().any(|t| t.title.contains("completion")));
    }

    #[test]
    fn abstains_below_minimum_conversations() {
        let events: Vec<Event> = (0..5)
            .map(|i| event(&format!("c{i}"), "respond", "ok", None))
            .collect();
        let analyzer = UxIssueAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        assert!(analyzer.analyze(&ctx).is_empty());
    }
}
