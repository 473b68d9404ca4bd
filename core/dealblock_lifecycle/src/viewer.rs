//! Role classification of the address looking at a project.

use serde::Serialize;

use crate::types::{Address, Milestone, MilestoneStatus, Project};

/// Roles the viewer holds in one project, computed once per project load.
///
/// The flags are independent: an initializer who configured themselves as
/// payee is both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewerContext {
    pub address: Option<Address>,
    pub is_initializer: bool,
    pub is_payee: bool,
    /// Known approver of at least one milestone.
    pub is_approver: bool,
}

impl ViewerContext {
    /// A viewer with no connected account.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_project(project: &Project, viewer: Option<Address>) -> Self {
        let Some(address) = viewer else {
            return Self::anonymous();
        };
        ViewerContext {
            address: Some(address),
            is_initializer: project.initializer == address,
            is_payee: project.payee == address,
            is_approver: project
                .milestones
                .iter()
                .any(|m| m.approvers.contains(&address)),
        }
    }

    /// Known member of this milestone's approver set.
    pub fn approves(&self, milestone: &Milestone) -> bool {
        self.address
            .map(|a| milestone.approvers.contains(&a))
            .unwrap_or(false)
    }

    /// Could be a member of this milestone's approver set.
    pub fn may_approve(&self, milestone: &Milestone) -> bool {
        self.address
            .map(|a| milestone.approvers.may_contain(&a))
            .unwrap_or(false)
    }

    /// `true` when this viewer's sign-off on `milestone` is required and not
    /// yet recorded.
    ///
    /// The contract exposes per-approver progress only for the initializer,
    /// so a known approver's sign-off counts as outstanding for as long as
    /// the milestone stays in review.
    pub fn owes_approval(&self, milestone: &Milestone) -> bool {
        if milestone.status != MilestoneStatus::Review {
            return false;
        }
        let initializer_owes = self.is_initializer
            && milestone.initializer_approval_required
            && !milestone.initializer_has_approved;
        initializer_owes || self.approves(milestone)
    }
}

/// Milestones in review still waiting for this viewer's sign-off.
pub fn pending_approvals_count(project: &Project, viewer: &ViewerContext) -> usize {
    project
        .milestones
        .iter()
        .filter(|m| viewer.owes_approval(m))
        .count()
}
