use chrono::Duration;

use crate::aggregate::{
    active_milestones, approval_progress, days_remaining, deadline, progress, total_value,
    value_locked, DashboardStats, Deadline,
};
use crate::invariants::assert_all_project_invariants;
use crate::test_support::{base_time, milestone, project, project_with_statuses};
use crate::types::{Approvers, MilestoneStatus};

use MilestoneStatus::*;

#[test]
fn test_progress_counts_terminal_milestones() {
    let p = project_with_statuses(&[Completed, Cancelled, Review]);
    let prog = progress(&p);
    assert_eq!(prog.done, 2);
    assert_eq!(prog.total, 3);
    assert!((prog.ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
    assert_eq!(prog.percent(), 67);
    assert!(!prog.is_complete());
    assert!(!p.completed);
    assert_all_project_invariants(&p);
}

#[test]
fn test_progress_of_empty_project_is_zero() {
    let p = project(vec![]);
    let prog = progress(&p);
    assert_eq!(prog.ratio(), 0.0);
    assert_eq!(prog.percent(), 0);
    assert!(!prog.is_complete());
}

#[test]
fn test_progress_complete_when_all_terminal() {
    let p = project_with_statuses(&[Completed, Cancelled]);
    assert!(progress(&p).is_complete());
    assert_eq!(progress(&p).ratio(), 1.0);
}

#[test]
fn test_total_value_includes_every_status() {
    let p = project_with_statuses(&[Initialized, Funded, Completed, Cancelled]);
    assert_eq!(total_value(&p), 20_000);
}

#[test]
fn test_value_locked_counts_funded_until_released() {
    let p = project_with_statuses(&[Initialized, Funded, Review, Approved, Completed, Cancelled]);
    assert_eq!(value_locked(&p), 15_000);
    assert_eq!(active_milestones(&p), 3);
}

#[test]
fn test_days_remaining_rounds_up() {
    let mut m = milestone(0, Funded);
    m.ending_at = base_time() + Duration::days(3) + Duration::hours(1);
    assert_eq!(days_remaining(&m, base_time()), 4);

    m.ending_at = base_time() + Duration::days(3);
    assert_eq!(days_remaining(&m, base_time()), 3);
    assert_eq!(deadline(&m, base_time()), Deadline::Remaining(3));
    assert_eq!(deadline(&m, base_time()).label(), "3 days left");
}

#[test]
fn test_deadline_overdue() {
    let mut m = milestone(0, Funded);
    m.ending_at = base_time() - Duration::days(2);
    assert_eq!(days_remaining(&m, base_time()), -2);
    let d = deadline(&m, base_time());
    assert!(d.is_overdue());
    assert_eq!(d, Deadline::Overdue(2));
    assert_eq!(d.label(), "2 days overdue");
}

#[test]
fn test_deadline_today_is_not_overdue() {
    let m = milestone(0, Funded);
    let d = deadline(&m, m.ending_at);
    assert_eq!(d, Deadline::Remaining(0));
    assert!(!d.is_overdue());
}

#[test]
fn test_approval_progress_waiting_on_initializer() {
    let mut m = milestone(0, Review);
    m.initializer_approval_required = true;
    m.initializer_has_approved = false;

    let p = approval_progress(&m);
    assert_eq!((p.approved, p.required), (0, 3));
    assert_eq!(p.ratio(), 0.0);
    assert_eq!(p.label(), "0 / 3");

    m.initializer_has_approved = true;
    let p = approval_progress(&m);
    assert_eq!((p.approved, p.required), (1, 3));
}

#[test]
fn test_approval_progress_vacuous_without_approvers() {
    let mut m = milestone(0, Review);
    m.approvers = Approvers::opaque(0);
    let p = approval_progress(&m);
    assert!(p.is_vacuous());
    assert_eq!(p.ratio(), 0.0);
}

#[test]
fn test_dashboard_stats_sum_projects() {
    let a = project_with_statuses(&[Funded, Completed]);
    let b = project_with_statuses(&[Review, Initialized, Approved]);
    let stats = DashboardStats::from_projects([&a, &b]);
    assert_eq!(stats.total_projects, 2);
    assert_eq!(stats.active_milestones, 3);
    assert_eq!(stats.value_locked, 15_000);
    assert_eq!(stats.total_value, 25_000);

    assert_eq!(
        DashboardStats::from_projects(std::iter::empty()),
        DashboardStats::default()
    );
}

#[test]
fn test_dashboard_stats_serialize_amounts_as_strings() {
    let p = project_with_statuses(&[Funded]);
    let json = serde_json::to_value(DashboardStats::from_projects([&p])).unwrap();
    assert_eq!(json["value_locked"], "5000");
    assert_eq!(json["total_projects"], 1);
}
