//! Derived values over projects and milestones.
//!
//! All functions are total and recomputed on every read; nothing here is
//! cached or updated incrementally.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Milestone, Project};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Terminal milestones over all milestones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    /// In `[0, 1]`; `0` for a project without milestones.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64
        }
    }

    pub fn percent(&self) -> u8 {
        (self.ratio() * 100.0).round() as u8
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done == self.total
    }
}

pub fn progress(project: &Project) -> Progress {
    Progress {
        done: project
            .milestones
            .iter()
            .filter(|m| m.status.is_terminal())
            .count(),
        total: project.milestones.len(),
    }
}

/// Sum of every milestone amount, whatever its status.
pub fn total_value(project: &Project) -> u128 {
    project
        .milestones
        .iter()
        .fold(0u128, |acc, m| acc.saturating_add(m.amount))
}

/// Amount currently held for funded, unreleased milestones.
pub fn value_locked(project: &Project) -> u128 {
    project
        .milestones
        .iter()
        .filter(|m| m.status.is_active())
        .fold(0u128, |acc, m| acc.saturating_add(m.amount))
}

pub fn active_milestones(project: &Project) -> usize {
    project
        .milestones
        .iter()
        .filter(|m| m.status.is_active())
        .count()
}

/// Whole days until the deadline, rounded up. Negative once overdue.
pub fn days_remaining(milestone: &Milestone, now: DateTime<Utc>) -> i64 {
    let diff = (milestone.ending_at - now).num_milliseconds();
    let days = diff / MILLIS_PER_DAY;
    if diff % MILLIS_PER_DAY > 0 {
        days + 1
    } else {
        days
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "days", rename_all = "snake_case")]
pub enum Deadline {
    Remaining(u64),
    Overdue(u64),
}

impl Deadline {
    pub fn is_overdue(&self) -> bool {
        matches!(self, Deadline::Overdue(_))
    }

    pub fn label(&self) -> String {
        match self {
            Deadline::Remaining(days) => format!("{days} days left"),
            Deadline::Overdue(days) => format!("{days} days overdue"),
        }
    }
}

pub fn deadline(milestone: &Milestone, now: DateTime<Utc>) -> Deadline {
    let days = days_remaining(milestone, now);
    if days < 0 {
        Deadline::Overdue(days.unsigned_abs())
    } else {
        Deadline::Remaining(days as u64)
    }
}

/// Recorded sign-offs over required sign-offs for a milestone in review.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ApprovalProgress {
    pub approved: u64,
    pub required: u64,
}

impl ApprovalProgress {
    /// In `[0, 1]`; `0` when nobody's sign-off is required.
    pub fn ratio(&self) -> f64 {
        if self.required == 0 {
            0.0
        } else {
            (self.approved.min(self.required)) as f64 / self.required as f64
        }
    }

    /// No approvers and no initializer sign-off required.
    pub fn is_vacuous(&self) -> bool {
        self.required == 0
    }

    pub fn label(&self) -> String {
        format!("{} / {}", self.approved, self.required)
    }
}

/// Only the initializer's sign-off is observable on-chain, so `approved` is
/// `0` or `1`.
pub fn approval_progress(milestone: &Milestone) -> ApprovalProgress {
    let required = milestone
        .approvers
        .len()
        .saturating_add(u64::from(milestone.initializer_approval_required));
    let approved = u64::from(milestone.initializer_has_approved).min(required);
    ApprovalProgress { approved, required }
}

/// Headline numbers for the dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_projects: usize,
    pub active_milestones: usize,
    #[serde(with = "crate::types::amount_string")]
    pub value_locked: u128,
    #[serde(with = "crate::types::amount_string")]
    pub total_value: u128,
}

impl DashboardStats {
    pub fn from_projects<'a>(projects: impl IntoIterator<Item = &'a Project>) -> Self {
        projects
            .into_iter()
            .fold(DashboardStats::default(), |acc, p| DashboardStats {
                total_projects: acc.total_projects + 1,
                active_milestones: acc.active_milestones + active_milestones(p),
                value_locked: acc.value_locked.saturating_add(value_locked(p)),
                total_value: acc.total_value.saturating_add(total_value(p)),
            })
    }
}
