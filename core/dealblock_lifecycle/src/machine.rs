//! # Milestone state machine
//!
//! Guards deciding which viewer may trigger which action on a milestone.
//!
//! | Action         | From → To                      | Role                         |
//! |----------------|--------------------------------|------------------------------|
//! | Fund           | Initialized → Funded           | initializer                  |
//! | MarkForReview  | Funded → Review                | payee                        |
//! | Approve        | Review → Approved              | initializer or approver      |
//! | Complete       | Review → Approved              | initializer                  |
//! | Release        | Approved → Completed           | per [`ReleasePolicy`]        |
//! | Cancel         | Initialized → Cancelled        | initializer                  |
//! | ExtendDeadline | Initialized, Funded → same     | initializer                  |
//! | AddTasks       | Initialized, Funded → same     | initializer                  |
//! | Edit           | Initialized → same             | initializer                  |
//!
//! Guards only answer "may this be submitted". The resulting status is
//! never applied locally: the contract decides, and callers re-read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::approval_progress;
use crate::errors::TransitionError;
use crate::types::{Milestone, MilestoneStatus, Project};
use crate::viewer::ViewerContext;

/// Something a viewer can do to a milestone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Fund,
    MarkForReview,
    Approve,
    Complete,
    Release,
    Cancel,
    ExtendDeadline,
    AddTasks,
    Edit,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Fund,
        Action::MarkForReview,
        Action::Approve,
        Action::Complete,
        Action::Release,
        Action::Cancel,
        Action::ExtendDeadline,
        Action::AddTasks,
        Action::Edit,
    ];

    /// Statuses the action may be taken from.
    pub fn sources(self) -> &'static [MilestoneStatus] {
        use MilestoneStatus::*;
        match self {
            Action::Fund | Action::Cancel | Action::Edit => &[Initialized],
            Action::MarkForReview => &[Funded],
            Action::Approve | Action::Complete => &[Review],
            Action::Release => &[Approved],
            Action::ExtendDeadline | Action::AddTasks => &[Initialized, Funded],
        }
    }

    /// Status a milestone in `from` ends up in once the action lands.
    pub fn target(self, from: MilestoneStatus) -> MilestoneStatus {
        match self {
            Action::Fund => MilestoneStatus::Funded,
            Action::MarkForReview => MilestoneStatus::Review,
            Action::Approve | Action::Complete => MilestoneStatus::Approved,
            Action::Release => MilestoneStatus::Completed,
            Action::Cancel => MilestoneStatus::Cancelled,
            Action::ExtendDeadline | Action::AddTasks | Action::Edit => from,
        }
    }

    /// Structural actions that an edit-locked milestone refuses.
    pub fn requires_unlocked(self) -> bool {
        matches!(self, Action::Fund | Action::AddTasks | Action::Edit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Fund => "fund",
            Action::MarkForReview => "mark for review",
            Action::Approve => "approve",
            Action::Complete => "complete",
            Action::Release => "release funds",
            Action::Cancel => "cancel",
            Action::ExtendDeadline => "extend the deadline",
            Action::AddTasks => "add tasks",
            Action::Edit => "edit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may release an approved milestone's funds. Depends on the deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// The payee withdraws.
    Payee,
    /// The initializer releases.
    Initializer,
    #[default]
    InitializerOrPayee,
}

impl ReleasePolicy {
    fn permits(self, viewer: &ViewerContext) -> bool {
        match self {
            ReleasePolicy::Payee => viewer.is_payee,
            ReleasePolicy::Initializer => viewer.is_initializer,
            ReleasePolicy::InitializerOrPayee => viewer.is_initializer || viewer.is_payee,
        }
    }

    fn role_name(self) -> &'static str {
        match self {
            ReleasePolicy::Payee => "payee",
            ReleasePolicy::Initializer => "project creator",
            ReleasePolicy::InitializerOrPayee => "project creator or payee",
        }
    }
}

impl FromStr for ReleasePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "payee" => Ok(ReleasePolicy::Payee),
            "initializer" => Ok(ReleasePolicy::Initializer),
            "initializer_or_payee" | "any" => Ok(ReleasePolicy::InitializerOrPayee),
            other => Err(format!("unknown release policy {other:?}")),
        }
    }
}

/// Everything a guard needs besides the milestone itself.
#[derive(Clone, Copy, Debug)]
pub struct GuardContext<'a> {
    pub project: &'a Project,
    pub viewer: &'a ViewerContext,
    pub release_policy: ReleasePolicy,
}

/// A transition that passed its guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub action: Action,
    pub from: MilestoneStatus,
    pub to: MilestoneStatus,
}

/// Evaluate the guard for `action` on `milestone`.
///
/// Pure: the milestone is only read. Checks run in a fixed order (project
/// lock, status, role, edit lock, action-specific) so the reported error is
/// the most fundamental one.
pub fn check_transition(
    action: Action,
    milestone: &Milestone,
    ctx: &GuardContext<'_>,
) -> Result<Transition, TransitionError> {
    if ctx.project.completed {
        return Err(TransitionError::ProjectLocked(ctx.project.id));
    }

    if !action.sources().contains(&milestone.status) {
        return Err(TransitionError::WrongState {
            action,
            status: milestone.status,
        });
    }

    check_role(action, milestone, ctx)?;

    if action.requires_unlocked() && milestone.edit_locked {
        return Err(TransitionError::EditLocked);
    }

    match action {
        Action::Approve => {
            // The initializer's own sign-off is the only one the contract
            // reports, so a repeat is caught here; approvers rely on the
            // contract's ALREADY_APPROVED.
            if ctx.viewer.is_initializer
                && milestone.initializer_has_approved
                && !ctx.viewer.approves(milestone)
            {
                return Err(TransitionError::AlreadyApproved);
            }
        }
        Action::Complete => {
            if milestone.initializer_approval_required && !milestone.initializer_has_approved {
                let progress = approval_progress(milestone);
                return Err(TransitionError::ApprovalsPending {
                    approved: progress.approved,
                    required: progress.required,
                });
            }
        }
        _ => {}
    }

    Ok(Transition {
        action,
        from: milestone.status,
        to: action.target(milestone.status),
    })
}

fn check_role(
    action: Action,
    milestone: &Milestone,
    ctx: &GuardContext<'_>,
) -> Result<(), TransitionError> {
    let viewer = ctx.viewer;
    let (permitted, required) = match action {
        Action::MarkForReview => (viewer.is_payee, "payee"),
        Action::Approve => (
            viewer.is_initializer || viewer.may_approve(milestone),
            "project creator or an approver",
        ),
        Action::Release => (
            ctx.release_policy.permits(viewer),
            ctx.release_policy.role_name(),
        ),
        Action::Fund
        | Action::Complete
        | Action::Cancel
        | Action::ExtendDeadline
        | Action::AddTasks
        | Action::Edit => (viewer.is_initializer, "project creator"),
    };
    if permitted {
        Ok(())
    } else {
        Err(TransitionError::WrongRole {
            action: action.as_str(),
            required,
        })
    }
}

/// Actions whose guard currently passes for this viewer.
pub fn available_actions(milestone: &Milestone, ctx: &GuardContext<'_>) -> Vec<Action> {
    Action::ALL
        .into_iter()
        .filter(|action| check_transition(*action, milestone, ctx).is_ok())
        .collect()
}

/// Guard for appending a milestone to a project.
pub fn check_add_milestone(
    project: &Project,
    viewer: &ViewerContext,
) -> Result<(), TransitionError> {
    if project.completed {
        return Err(TransitionError::ProjectLocked(project.id));
    }
    if !viewer.is_initializer {
        return Err(TransitionError::WrongRole {
            action: "add milestones",
            required: "project creator",
        });
    }
    Ok(())
}

/// `true` if `to` is reachable from `from` in one step of the lifecycle
/// graph. Same-status steps (deadline, tasks, edit) are not counted.
pub fn is_forward_step(from: MilestoneStatus, to: MilestoneStatus) -> bool {
    Action::ALL
        .into_iter()
        .any(|a| a.sources().contains(&from) && a.target(from) == to && from != to)
}
