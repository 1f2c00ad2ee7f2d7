//! DocsGapAnalyzer (§4.3.3): flags frequently-used tools that lack
//! documentation, per a predicate supplied by the host.

use std::collections::HashMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::event::{Event, EventReader};
use crate::task::{
    compute_priority, generate_task_id, Evidence, Severity, Status, SuggestedFix, TaskCard,
    TaskType,
};

#[cfg(test)]
const DEFAULT_MIN_USAGE: u64 = 20;

/// The host-supplied predicate deciding whether a tool already has
/// documentation on record. Analyzers must stay pure with respect to the
/// event window, so this is injected rather than looked up internally.
pub trait DocumentationLookup: Send + Sync {
    fn is_documented(&self, tool_name: &str) -> bool;
}

pub struct DocsGapAnalyzer {
    pub min_usage: u64,
    pub documentation: Box<dyn DocumentationLookup>,
}

impl Analyzer for DocsGapAnalyzer {
    fn name(&self) -> &'static str {
        "docs_gap"
    }

    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Vec<TaskCard> {
        let tool_calls: Vec<_> = ctx
            .events
            .iter()
            .filter(|e| e.act == "tool_call" && e.name.is_some())
            .cloned()
            .collect();
        let groups = EventReader::group_by(&tool_calls, |e| e.name.clone());

        let mut tasks = Vec::new();
        let mut names: Vec<&String> = groups.keys().collect();
        names.sort();
        for name in names {
            let events = &groups[name];
            let owned_events: Vec<Event> = events.iter().map(|e| (*e).clone()).collect();
            let count = events.len() as u64;
            if count < self.min_usage || self.documentation.is_documented(name) {
                continue;
            }

            let severity = if count >= 100 {
                Severity::Critical
            } else if count >= 50 {
                Severity::High
            } else {
                Severity::Medium
            };
            let confidence = 0.90;

            let mut metrics = HashMap::new();
            metrics.insert("callCount".to_string(), count as f64);
            metrics.insert("minUsage".to_string(), self.min_usage as f64);

            let evidence = Evidence {
                summary: format!("{name} was called {count} times but has no recorded documentation"),
                details: vec![format!("usage threshold {} exceeded", self.min_usage)],
                metrics,
                samples: EventReader::samples(&owned_events, 5),
            };
            let priority = compute_priority(severity, confidence, &evidence);

            tasks.push(TaskCard {
                id: generate_task_id(ctx.to, &format!("docs-gap-{name}")),
                task_type: TaskType::DocumentationGap,
                severity,
                status: Status::Generated,
                title: format!("Document the {name} tool"),
                description: format!(
                    "{name} has been called {count} times in the analyzed window but has no documentation on record."
                ),
                evidence,
                suggested_fix: SuggestedFix {
                    approach: "add_documentation".to_string(),
                    files: Vec::new(),
                    changes: vec![format!("Write usage documentation for {name}")],
                    estimated_effort: Some("small".to_string()),
                },
                acceptance_criteria: vec!["Tool documentation published".to_string()],
                priority,
                confidence,
                analyzer: self.name().to_string(),
                generated_at: ctx.to,
                approved_at: None,
                dismissed_at: None,
                completed_at: None,
                dismiss_reason: None,
                metadata: None,
            });
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Baselines;
    use crate::event::{Actor, Event};
    use chrono::Utc;

    struct NeverDocumented;
    impl DocumentationLookup for NeverDocumented {
        fn is_documented(&self, _tool_name: &str) -> bool {
            false
        }
    }

    fn tool_call(name: &str) -> Event {
        Event {
            id: "e".into(),
            ts: Utc::now(),
            actor: Actor::Assistant,
            act: "tool_call".into(),
            name: Some(name.into()),
            status: Some("ok".into()),
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
    fn flags_undocumented_frequent_tool() {
        let events = vec![tool_call("scrape_web"); 25];
        let analyzer = DocsGapAnalyzer {
            min_usage: DEFAULT_MIN_USAGE,
            documentation: Box::new(NeverDocumented),
        };
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        let tasks = analyzer.analyze(&ctx);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].title.contains("scrape_web"));
    }

    #[test]
    fn abstains_below_usage_threshold() {
        let events = vec![tool_call("rare_tool"); 5];
        let analyzer = DocsGapAnalyzer {
            min_usage: DEFAULT_MIN_USAGE,
            documentation: Box::new(NeverDocumented),
        };
        let now = Utc::now();
        let ctx = AnalyzerContext::new(&events, now - chrono::Duration::hours(1), now, Baselines::default());
        assert!(analyzer.analyze(&ctx).is_empty());
    }
}
