//! ContinuationAnalyzer (§4.3.1): detects assistant responses that were cut
//! off by the token budget and had to continue.

use std::collections::HashMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::task::{
    compute_priority, generate_task_id, Evidence, Severity, Status, SuggestedFix, TaskCard,
    TaskType,
};

const MIN_SAMPLE: usize = 20;

pub struct ContinuationAnalyzer {
    pub threshold: f64,
}

impl Default for ContinuationAnalyzer {
    fn default() -> Self {
        Self { threshold: 0.15 }
    }
}

impl Analyzer for ContinuationAnalyzer {
    fn name(&self) -> &'static str {
        "continuation"
    }

    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Vec<TaskCard> {
        let responses: Vec<_> = ctx
            .events
            .iter()
            .filter(|e| e.actor == crate::event::Actor::Assistant && e.finish_reason.is_some())
            .collect();
        let total = responses.len();
        if total < MIN_SAMPLE {
            return Vec::new();
        }

        let continuations = responses
            .iter()
            .filter(|e| e.finish_reason.as_deref() == Some("length"))
            .count();
        let ratio = continuations as f64 / total as f64;
        if ratio <= self.threshold {
            return Vec::new();
        }

        let severity = if ratio > 0.30 {
            Severity::Critical
        } else if ratio > 0.20 {
            Severity::High
        } else {
            Severity::Medium
        };
        let confidence = (0.70 + 2.0 * (ratio - self.threshold)).clamp(0.0, 0.95);

        let mut metrics = HashMap::new();
        metrics.insert("continuationRate".to_string(), ratio);
        metrics.insert("threshold".to_string(), self.threshold);
        metrics.insert("totalResponses".to_string(), total as f64);
        metrics.insert("continuations".to_string(), continuations as f64);

        let evidence = Evidence {
            summary: format!(
                "{:.0}% of assistant responses ({continuations}/{total}) were truncated and continued",
                ratio * 100.0
            ),
            details: vec![format!(
                "continuation rate {:.1}% exceeds threshold {:.1}%",
                ratio * 100.0,
                self.threshold * 100.0
            )],
            metrics,
            samples: crate::event::EventReader::samples(
                &responses
                    .iter()
                    .filter(|e| e.finish_reason.as_deref() == Some("length"))
                    .map(|e| (*e).clone())
                    .collect::<Vec<_>>(),
                5,
            ),
        };
        let priority = compute_priority(severity, confidence, &evidence);

        vec![TaskCard {
            id: generate_task_id(ctx.to, "continuation-issue"),
            task_type: TaskType::ContinuationIssue,
            severity,
            status: Status::Generated,
            title: "Investigate elevated response continuation rate".to_string(),
            description: format!(
                "Assistant responses are being truncated by the token budget in {:.0}% of cases over the analyzed window, well above the {:.0}% threshold.",
                ratio * 100.0,
                self.threshold * 100.0
            ),
            evidence,
            suggested_fix: SuggestedFix {
                approach: "increase_max_tokens".to_string(),
                files: Vec::new(),
                changes: vec!["Raise the max-token budget for affected response generation".to_string()],
                estimated_effort: Some("small".to_string()),
            },
            acceptance_criteria: vec![
                "Continuation rate drops below the configured threshold".to_string()
            ],
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

    fn response(finish_reason: &str) -> Event {
        Event {
            id: "e".into(),
            ts: Utc::now(),
            actor: Actor::Assistant,
            act: "respond".into(),
            name: None,
            status: Some("ok".into()),
            conv_id: None,
            trace_id: None,
            session_id: None,
            iter: None,
            elapsed_ms: None,
            finish_reason: Some(finish_reason.into()),
            content_preview: None,
            result_preview: None,
            args_preview: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn triggers_above_threshold_with_sufficient_sample() {
        let mut events = vec![response("stop"); 166];
        events.extend(vec![response("length"); 34]);
        let analyzer = ContinuationAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        let tasks = analyzer.analyze(&ctx);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::ContinuationIssue);
    }

    #[test]
    fn abstains_below_minimum_sample() {
        let events = vec![response("length"); 10];
        let analyzer = ContinuationAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        assert!(analyzer.analyze(&ctx).is_empty());
    }

    #[test]
    fn abstains_below_ratio_threshold() {
        let mut events = vec![response("stop"); 190];
        events.extend(vec![response("length"); 10]);
        let analyzer = ContinuationAnalyzer::default();
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        assert!(analyzer.analyze(&ctx).is_empty());
    }
}
