//! The canonical task card entity (component C2): construction with
//! validation, priority computation, status transitions, and the sort/filter
//! helpers every downstream component (store, scheduler, auto-approval) uses.
//!
//! Status transitions return a new record rather than mutating in place —
//! the store, not this module, decides when a new record becomes the
//! authoritative one for an id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The analyzer-assigned task category, plus the `template` sentinel for
/// tasks created from a template instead of an analyzer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ContinuationIssue,
    ErrorSpike,
    DocumentationGap,
    PerformanceDegradation,
    UxIssue,
    Template,
}

/// Ordered severity enum; `Ord` follows declaration order so
/// `Severity::Critical > Severity::High` holds directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Fixed weight table backing priority computation (I3).
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 100.0,
            Severity::High => 75.0,
            Severity::Medium => 50.0,
            Severity::Low => 25.0,
        }
    }
}

/// The task lifecycle state machine (I2). `Engaged` is deliberately absent —
/// it is a derived read-time concept (see [`crate::funnel`]), never a stored
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Generated,
    Approved,
    Dismissed,
    Completed,
}

impl Status {
    /// Whether `self -> to` is a legal forward transition under I2.
    pub fn can_transition_to(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Generated, Status::Approved)
                | (Status::Generated, Status::Dismissed)
                | (Status::Generated, Status::Completed)
                | (Status::Approved, Status::Completed)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub summary: String,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    #[serde(default)]
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub approach: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub estimated_effort: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub related_events: Vec<String>,
}

/// The canonical task card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCard {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub severity: Severity,
    pub status: Status,
    pub title: String,
    pub description: String,
    pub evidence: Evidence,
    pub suggested_fix: SuggestedFix,
    pub acceptance_criteria: Vec<String>,
    pub priority: i32,
    pub confidence: f64,
    pub analyzer: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dismiss_reason: Option<String>,
    #[serde(default)]
    pub metadata: Option<TaskMetadata>,
}

/// Inputs needed to compute I3's `impactMultiplier`. Analyzers own how they
/// derive this from their evidence; this module only clamps and rounds.
pub fn impact_multiplier(evidence: &Evidence) -> f64 {
    let raw = evidence
        .metrics
        .get("impactMultiplier")
        .copied()
        .unwrap_or(1.0);
    raw.clamp(1.0, 1.5)
}

/// Generates a lexicographically sortable, globally unique, time-prefixed
/// task id: `<millisecond timestamp>-<8 hex chars of blake3(seed)>`, the same
/// checksum-based uniqueness scheme the teacher uses for its own ids.
pub fn generate_task_id(now: DateTime<Utc>, seed: &str) -> String {
    let hash = blake3::hash(seed.as_bytes());
    format!("{:013x}-{}", now.timestamp_millis(), &hash.to_hex()[..8])
}

/// I3: `priority = clamp(round(severityWeight(severity) * confidence *
/// impactMultiplier(evidence)), 0, 100)`.
pub fn compute_priority(severity: Severity, confidence: f64, evidence: &Evidence) -> i32 {
    let raw = severity.weight() * confidence * impact_multiplier(evidence);
    raw.round().clamp(0.0, 100.0) as i32
}

impl TaskCard {
    /// Enforces §4.2's required-field and range checks.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingField("description"));
        }
        if self.acceptance_criteria.is_empty() {
            return Err(ValidationError::EmptyAcceptanceCriteria);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(
                self.confidence.to_string(),
            ));
        }
        if self.evidence.summary.trim().is_empty() {
            return Err(ValidationError::EmptyEvidenceSummary);
        }
        Ok(())
    }

    /// Attempts the I2 transition. Illegal (including reverse) transitions
    /// are no-ops: the caller gets `None` back and is expected to log an
    /// anomaly via the audit writer rather than treat this as fatal.
    pub fn transition(&self, to: Status, now: DateTime<Utc>) -> Option<TaskCard> {
        if !self.status.can_transition_to(to) {
            return None;
        }
        let mut next = self.clone();
        next.status = to;
        match to {
            Status::Approved => next.approved_at = Some(now),
            Status::Dismissed => next.dismissed_at = Some(now),
            Status::Completed => next.completed_at = Some(now),
            Status::Generated => {}
        }
        Some(next)
    }

    pub fn dismiss(&self, reason: String, now: DateTime<Utc>) -> Option<TaskCard> {
        let mut next = self.transition(Status::Dismissed, now)?;
        next.dismiss_reason = Some(reason);
        Some(next)
    }

    /// Whether this task counts as "active" for duplicate suppression (I5)
    /// and the change-broadcast active list.
    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Generated | Status::Approved)
    }
}

/// Stable sort per §4.2: priority desc, confidence desc, generatedAt desc,
/// then id asc as the final tie-break (§4.3's "numeric ties" rule).
pub fn sort_tasks(tasks: &mut [TaskCard]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap())
            .then_with(|| b.generated_at.cmp(&a.generated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Optional filter criteria for `/tasks` and the store's `Load`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub task_type: Option<TaskType>,
}

impl TaskFilter {
    pub fn matches(&self, task: &TaskCard) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(summary: &str) -> Evidence {
        Evidence {
            summary: summary.into(),
            ..Default::default()
        }
    }

    #[test]
    fn priority_matches_i3_formula() {
        let p = compute_priority(Severity::High, 0.86, &evidence("x"));
        assert_eq!(p, (75.0 * 0.86 * 1.0_f64).round() as i32);
    }

    #[test]
    fn priority_clamps_to_100() {
        let mut ev = evidence("x");
        ev.metrics.insert("impactMultiplier".into(), 1.5);
        let p = compute_priority(Severity::Critical, 1.0, &ev);
        assert_eq!(p, 100);
    }

    #[test]
    fn validate_rejects_empty_acceptance_criteria() {
        let task = sample_task();
        let mut bad = task.clone();
        bad.acceptance_criteria.clear();
        assert_eq!(
            bad.validate(),
            Err(ValidationError::EmptyAcceptanceCriteria)
        );
    }

    #[test]
    fn transition_forward_only() {
        let task = sample_task();
        let now = Utc::now();
        assert!(task.transition(Status::Approved, now).is_some());
        let approved = task.transition(Status::Approved, now).unwrap();
        assert!(approved.transition(Status::Generated, now).is_none());
        assert!(approved.transition(Status::Completed, now).is_some());
    }

    #[test]
    fn sort_breaks_ties_by_id() {
        let now = Utc::now();
        let mut a = sample_task();
        a.id = "b-task".into();
        a.priority = 50;
        a.confidence = 0.9;
        a.generated_at = now;
        let mut b = sample_task();
        b.id = "a-task".into();
        b.priority = 50;
        b.confidence = 0.9;
        b.generated_at = now;

        let mut tasks = vec![a, b];
        sort_tasks(&mut tasks);
        assert_eq!(tasks[0].id, "a-task");
    }

    fn sample_task() -> TaskCard {
        TaskCard {
            id: "20260101-abc".into(),
            task_type: TaskType::ContinuationIssue,
            severity: Severity::High,
            status: Status::Generated,
            title: "Investigate".into(),
            description: "desc".into(),
            evidence: evidence("summary"),
            suggested_fix: SuggestedFix::default(),
            acceptance_criteria: vec!["criterion".into()],
            priority: 60,
            confidence: 0.86,
            analyzer: "continuation".into(),
            generated_at: Utc::now(),
            approved_at: None,
            dismissed_at: None,
            completed_at: None,
            dismiss_reason: None,
            metadata: None,
        }
    }
}
