//! Telemetry event model, task card model, and analyzer framework for the
//! task generator. No I/O beyond reading the telemetry directory lives here —
//! persistence, scheduling, and the HTTP surface belong to `tgt-server`.

pub mod analyzer;
pub mod analyzers;
pub mod config;
pub mod error;
pub mod event;
pub mod funnel;
pub mod task;
pub mod template;

pub use analyzer::{AnalyzerContext, Baselines, Registry};
pub use config::TgtConfig;
pub use error::{ConflictError, EventReadError, NotFoundError, ValidationError};
pub use event::{Actor, Event, EventFilter, EventReader, LoadOutcome};
pub use task::{Severity, Status, TaskCard, TaskType};
pub use template::{Template, TemplateRegistry};

pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {}
}
