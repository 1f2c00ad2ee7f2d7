//! Funnel analytics (§4.7, pull-only): conversion rates and a weighted
//! health score over task state transitions within a trailing window.

use chrono::{DateTime, Utc};

use crate::task::{Status, TaskCard};

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct FunnelCounts {
    pub generated: usize,
    pub engaged: usize,
    pub approved: usize,
    pub completed: usize,
    pub dismissed: usize,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct FunnelReport {
    pub counts: FunnelCounts,
    pub generated_to_engaged: f64,
    pub engaged_to_approved: f64,
    pub approved_to_completed: f64,
    pub health_score: i32,
}

/// A task is "engaged" the instant its latest status is no longer
/// `generated` — the status-transition definition this crate resolved the
/// spec's open question to (see DESIGN.md).
fn is_engaged(task: &TaskCard) -> bool {
    task.status != Status::Generated
}

fn is_approved_or_completed(task: &TaskCard) -> bool {
    matches!(task.status, Status::Approved | Status::Completed)
}

fn clamp_rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64).clamp(0.0, 1.0)
    }
}

/// Computes the funnel over tasks generated within `[now - days_back, now]`.
pub fn compute(tasks: &[TaskCard], days_back: i64, now: DateTime<Utc>) -> FunnelReport {
    let window_start = now - chrono::Duration::days(days_back);
    let in_window: Vec<&TaskCard> = tasks
        .iter()
        .filter(|t| t.generated_at >= window_start && t.generated_at <= now)
        .collect();

    let generated = in_window.len();
    let engaged = in_window.iter().filter(|t| is_engaged(t)).count();
    let approved = in_window.iter().filter(|t| is_approved_or_completed(t)).count();
    let completed = in_window
        .iter()
        .filter(|t| t.status == Status::Completed)
        .count();
    let dismissed = in_window
        .iter()
        .filter(|t| t.status == Status::Dismissed)
        .count();

    let counts = FunnelCounts {
        generated,
        engaged,
        approved,
        completed,
        dismissed,
    };

    let r_ge = clamp_rate(engaged, generated);
    let r_ea = clamp_rate(approved, engaged);
    let r_ac = clamp_rate(completed, approved);

    // The tiny epsilon absorbs float rounding error (e.g. 50/75 * 0.3) so
    // exact-half cases round the way the formula's fractions intend.
    let health_score = (100.0 * (0.30 * r_ge + 0.30 * r_ea + 0.40 * r_ac) + 1e-9)
        .round()
        .clamp(0.0, 100.0) as i32;

    FunnelReport {
        counts,
        generated_to_engaged: r_ge,
        engaged_to_approved: r_ea,
        approved_to_completed: r_ac,
        health_score,
    }
}

/// One of a small fixed set of recommendations, selected by whichever
/// conversion rate in the funnel is lowest.
pub fn recommend(report: &FunnelReport) -> &'static str {
    let rates = [
        (report.generated_to_engaged, "Tasks are generated but not reviewed — surface them more prominently to users."),
        (report.engaged_to_approved, "Tasks are reviewed but rarely approved — tighten analyzer precision or lower confidence noise."),
        (report.approved_to_completed, "Tasks are approved but not completed — investigate downstream execution friction."),
    ];
    rates
        .iter()
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
        .map(|(_, msg)| *msg)
        .unwrap_or("Funnel is healthy; no action recommended.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Evidence, Severity, SuggestedFix, TaskType};

    fn task(status: Status) -> TaskCard {
        TaskCard {
            id: "t".into(),
            task_type: TaskType::ContinuationIssue,
            severity: Severity::Medium,
            status,
            title: "t".into(),
            description: "d".into(),
            evidence: Evidence::default(),
            suggested_fix: SuggestedFix::default(),
            acceptance_criteria: vec!["x".into()],
            priority: 50,
            confidence: 0.8,
            analyzer: "continuation".into(),
            generated_at: Utc::now(),
            approved_at: None,
            dismissed_at: None,
            completed_at: None,
            dismiss_reason: None,
            metadata: None,
        }
    }

    #[test]
    fn health_score_matches_scenario_6() {
        // 100 generated; 75 engaged; 50 approved-or-completed; 30 completed; 25 dismissed.
        let mut tasks = Vec::new();
        tasks.extend((0..25).map(|_| task(Status::Generated)));
        tasks.extend((0..25).map(|_| task(Status::Dismissed)));
        tasks.extend((0..20).map(|_| task(Status::Approved)));
        tasks.extend((0..30).map(|_| task(Status::Completed)));

        let report = compute(&tasks, 30, Utc::now());
        assert_eq!(report.counts.generated, 100);
        assert_eq!(report.counts.engaged, 75);
        assert_eq!(report.counts.approved, 50);
        assert_eq!(report.counts.completed, 30);
        assert_eq!(report.counts.dismissed, 25);
        assert!((report.generated_to_engaged - 0.75).abs() < 1e-9);
        assert!((report.engaged_to_approved - (50.0 / 75.0)).abs() < 1e-9);
        assert!((report.approved_to_completed - 0.60).abs() < 1e-9);
        assert_eq!(report.health_score, 67);
    }

    #[test]
    fn recommend_picks_lowest_conversion() {
        let report = FunnelReport {
            counts: FunnelCounts::default(),
            generated_to_engaged: 0.9,
            engaged_to_approved: 0.2,
            approved_to_completed: 0.8,
            health_score: 50,
        };
        assert!(recommend(&report).contains("approved"));
    }
}
