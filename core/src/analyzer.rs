//! The analyzer framework (component C3): a uniform contract plus a registry
//! that runs every analyzer concurrently and isolates failures.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::event::Event;
use crate::task::{sort_tasks, TaskCard};

/// The half-open `[from, to)` window an analyzer run operates over, plus the
/// events falling inside it.
pub struct AnalyzerContext<'a> {
    pub events: &'a [Event],
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub duration_ms: i64,
    /// Historical baselines this run's analyzers may need; absent entries
    /// mean "insufficient history" and analyzers must abstain, not guess.
    pub baselines: Baselines,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Baselines {
    pub errors_per_hour: Option<f64>,
    pub continuation_ratio: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
}

impl<'a> AnalyzerContext<'a> {
    pub fn new(events: &'a [Event], from: DateTime<Utc>, to: DateTime<Utc>, baselines: Baselines) -> Self {
        let duration_ms = (to - from).num_milliseconds();
        Self {
            events,
            from,
            to,
            duration_ms,
            baselines,
        }
    }
}

/// A pure function from an event window to zero or more task cards.
/// Implementors must not perform I/O or touch the task store (§4.3).
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;
    fn enabled(&self) -> bool {
        true
    }
    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Vec<TaskCard>;
}

/// One analyzer's outcome during a registry run: success with its cards, or
/// an isolated failure that never prevents the others from being collected.
pub struct AnalyzerOutcome {
    pub analyzer: &'static str,
    pub tasks: Vec<TaskCard>,
    pub failed: bool,
}

/// Holds a homogeneous collection of analyzers and runs them concurrently.
pub struct Registry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl Registry {
    pub fn new(analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        Self {
            analyzers: analyzers.into_iter().map(Arc::from).collect(),
        }
    }

    /// Runs every enabled analyzer on its own task concurrently, isolating
    /// panics/failures so one analyzer never prevents another's result from
    /// being collected, then aggregates into a single priority-sorted list.
    ///
    /// Each task gets its own clone of the event window (cheap: `Event` is
    /// shared via `Arc<[Event]>`) so none of them needs to borrow from `ctx`
    /// across the `.await`.
    pub async fn run(&self, ctx: &AnalyzerContext<'_>) -> (Vec<TaskCard>, Vec<AnalyzerOutcome>) {
        let events: Arc<[Event]> = Arc::from(ctx.events);
        let from = ctx.from;
        let to = ctx.to;
        let baselines = ctx.baselines;

        let mut handles = Vec::with_capacity(self.analyzers.len());
        for analyzer in &self.analyzers {
            if !analyzer.enabled() {
                continue;
            }
            let analyzer = Arc::clone(analyzer);
            let events = Arc::clone(&events);
            let name = analyzer.name();
            let handle = tokio::task::spawn(async move {
                let local_ctx = AnalyzerContext::new(&events, from, to, baselines);
                analyzer.analyze(&local_ctx)
            });
            handles.push((name, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(tasks) => outcomes.push(AnalyzerOutcome {
                    analyzer: name,
                    tasks,
                    failed: false,
                }),
                Err(e) => {
                    tracing::warn!(analyzer = name, error = %e, "analyzer panicked, isolating failure");
                    outcomes.push(AnalyzerOutcome {
                        analyzer: name,
                        tasks: Vec::new(),
                        failed: true,
                    });
                }
            }
        }

        let mut all: Vec<TaskCard> = outcomes.iter().flat_map(|o| o.tasks.clone()).collect();
        sort_tasks(&mut all);
        (all, outcomes)
    }
}
