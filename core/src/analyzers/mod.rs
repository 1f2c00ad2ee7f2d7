//! The five concrete analyzers (§4.3.1-4.3.5).

mod continuation;
mod docs_gap;
mod error_spike;
mod performance;
mod ux_issue;

pub use continuation::ContinuationAnalyzer;
pub use docs_gap::{DocsGapAnalyzer, DocumentationLookup};
pub use error_spike::ErrorSpikeAnalyzer;
pub use performance::PerformanceAnalyzer;
pub use ux_issue::UxIssueAnalyzer;
