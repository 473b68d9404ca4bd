//! Response shapes built from a freshly read [`Project`].
//!
//! Everything here is derived on each request; nothing is cached between
//! reads.

use chrono::{DateTime, Utc};
use dealblock_lifecycle::amount::format_token_amount;
use dealblock_lifecycle::{
    approval_progress, available_actions, check_add_milestone, deadline, pending_approvals_count,
    progress, total_value, value_locked, Action, Address, ApprovalProgress, DashboardStats,
    Deadline, GuardContext, Milestone, Progress, Project, ReleasePolicy, StatusDisplay,
    ViewerContext,
};
use serde::Serialize;

use crate::token::TokenRegistry;

/// Digits after the decimal point in displayed amounts.
const DISPLAY_FRACTION_DIGITS: u32 = 2;

/// Request-independent inputs to every view.
#[derive(Clone, Copy)]
pub struct ViewSettings<'a> {
    pub now: DateTime<Utc>,
    pub release_policy: ReleasePolicy,
    pub tokens: &'a TokenRegistry,
    pub token_decimals: u32,
}

impl ViewSettings<'_> {
    fn amount(&self, raw: u128) -> String {
        format_token_amount(raw, self.token_decimals, DISPLAY_FRACTION_DIGITS)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneView {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub display: StatusDisplay,
    pub amount_display: String,
    pub deadline: Deadline,
    pub approval: ApprovalProgress,
    pub owes_approval: bool,
    pub actions: Vec<Action>,
}

impl MilestoneView {
    pub fn build(
        milestone: &Milestone,
        ctx: &GuardContext<'_>,
        settings: &ViewSettings<'_>,
    ) -> Self {
        MilestoneView {
            milestone: milestone.clone(),
            display: milestone.status.display(),
            amount_display: settings.amount(milestone.amount),
            deadline: deadline(milestone, settings.now),
            approval: approval_progress(milestone),
            owes_approval: ctx.viewer.owes_approval(milestone),
            actions: available_actions(milestone, ctx),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub vault: Address,
    pub initializer: Address,
    pub payee: Address,
    pub token: Address,
    pub token_symbol: Option<String>,
    pub completed: bool,
    pub progress: Progress,
    pub progress_percent: u8,
    pub total_value: String,
    pub value_locked: String,
    pub viewer: ViewerContext,
    pub can_add_milestone: bool,
    pub pending_approvals: usize,
    pub milestones: Vec<MilestoneView>,
}

impl ProjectView {
    pub fn build(project: &Project, viewer: Option<Address>, settings: &ViewSettings<'_>) -> Self {
        let viewer = ViewerContext::for_project(project, viewer);
        let ctx = GuardContext {
            project,
            viewer: &viewer,
            release_policy: settings.release_policy,
        };
        let prog = progress(project);
        ProjectView {
            id: project.id,
            title: project.title.clone(),
            description: project.description.clone(),
            vault: project.vault,
            initializer: project.initializer,
            payee: project.payee,
            token: project.token,
            token_symbol: settings.tokens.symbol_of(&project.token).map(String::from),
            completed: project.completed,
            progress: prog,
            progress_percent: prog.percent(),
            total_value: settings.amount(total_value(project)),
            value_locked: settings.amount(value_locked(project)),
            can_add_milestone: check_add_milestone(project, &viewer).is_ok(),
            pending_approvals: pending_approvals_count(project, &viewer),
            milestones: project
                .milestones
                .iter()
                .map(|m| MilestoneView::build(m, &ctx, settings))
                .collect(),
            viewer,
        }
    }
}

/// Summary shown on the dashboard grid.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectCard {
    pub id: u64,
    pub title: String,
    pub payee: String,
    pub token_symbol: Option<String>,
    pub completed: bool,
    pub progress_percent: u8,
    pub milestones: usize,
    pub total_value: String,
}

impl ProjectCard {
    pub fn build(project: &Project, settings: &ViewSettings<'_>) -> Self {
        ProjectCard {
            id: project.id,
            title: project
                .title
                .clone()
                .unwrap_or_else(|| format!("Project #{}", project.id)),
            payee: project.payee.short(),
            token_symbol: settings.tokens.symbol_of(&project.token).map(String::from),
            completed: project.completed,
            progress_percent: progress(project).percent(),
            milestones: project.milestones.len(),
            total_value: settings.amount(total_value(project)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub stats: DashboardStats,
    pub value_locked: String,
    pub pending_approvals: usize,
    pub projects: Vec<ProjectCard>,
    /// Requested ids that do not exist on-chain.
    pub missing: Vec<u64>,
}

impl DashboardView {
    pub fn build(
        projects: &[Project],
        missing: Vec<u64>,
        viewer: Option<Address>,
        settings: &ViewSettings<'_>,
    ) -> Self {
        let stats = DashboardStats::from_projects(projects);
        let pending_approvals = projects
            .iter()
            .map(|p| pending_approvals_count(p, &ViewerContext::for_project(p, viewer)))
            .sum();
        DashboardView {
            value_locked: settings.amount(stats.value_locked),
            stats,
            pending_approvals,
            projects: projects
                .iter()
                .map(|p| ProjectCard::build(p, settings))
                .collect(),
            missing,
        }
    }
}
