//! Local validation of user drafts.
//!
//! Everything here runs before a transaction is built, so a rejected draft
//! never reaches the wallet or the chain.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::types::{Address, Milestone, Task};

/// A task row as typed into a form. Rows without a title are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        TaskDraft {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Trim rows, drop untitled ones, and require at least one task.
pub fn collect_tasks(drafts: &[TaskDraft]) -> Result<Vec<Task>, ValidationError> {
    let tasks: Vec<Task> = drafts
        .iter()
        .filter(|d| !d.title.trim().is_empty())
        .map(|d| Task::new(d.title.trim(), d.description.trim()))
        .collect();
    if tasks.is_empty() {
        return Err(ValidationError::NoTasks);
    }
    Ok(tasks)
}

/// Parse approver rows, skipping blank ones. Addresses must be unique and
/// non-zero.
pub fn collect_approvers(raw: &[String]) -> Result<Vec<Address>, ValidationError> {
    let mut seen = HashSet::new();
    let mut approvers = Vec::new();
    for row in raw.iter().filter(|r| !r.trim().is_empty()) {
        let address = Address::parse(row)?;
        if address.is_zero() {
            return Err(ValidationError::ZeroAddress("approver"));
        }
        if !seen.insert(address) {
            return Err(ValidationError::DuplicateApprover(address));
        }
        approvers.push(address);
    }
    Ok(approvers)
}

/// Split task rows into the parallel title/description arrays the contract takes.
pub fn split_tasks(tasks: &[Task]) -> (Vec<String>, Vec<String>) {
    tasks
        .iter()
        .map(|t| (t.title.clone(), t.description.clone()))
        .unzip()
}

/// A milestone as entered in the add-milestone or create-project form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneDraft {
    /// Smallest token units.
    pub amount: u128,
    pub ending_at: DateTime<Utc>,
    pub tasks: Vec<TaskDraft>,
    #[serde(default)]
    pub approvers: Vec<String>,
}

/// A milestone draft that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidMilestone {
    pub amount: u128,
    pub ending_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub approvers: Vec<Address>,
}

impl MilestoneDraft {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<ValidMilestone, ValidationError> {
        if self.amount == 0 {
            return Err(ValidationError::NonPositiveAmount);
        }
        if self.ending_at <= now {
            return Err(ValidationError::DeadlineInPast);
        }
        Ok(ValidMilestone {
            amount: self.amount,
            ending_at: self.ending_at,
            tasks: collect_tasks(&self.tasks)?,
            approvers: collect_approvers(&self.approvers)?,
        })
    }
}

/// The create-project form: project details plus its first milestone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectDraft {
    pub payee: String,
    pub token: Address,
    pub title: String,
    pub description: String,
    pub milestone: MilestoneDraft,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidProject {
    pub payee: Address,
    pub token: Address,
    pub title: String,
    pub description: String,
    pub milestone: ValidMilestone,
}

impl ProjectDraft {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<ValidProject, ValidationError> {
        let payee = Address::parse(&self.payee)?;
        if payee.is_zero() {
            return Err(ValidationError::ZeroAddress("payee"));
        }
        if self.token.is_zero() {
            return Err(ValidationError::ZeroAddress("token"));
        }
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        Ok(ValidProject {
            payee,
            token: self.token,
            title: title.to_string(),
            description: self.description.trim().to_string(),
            milestone: self.milestone.validate(now)?,
        })
    }
}

/// A new deadline must be in the future and strictly later than the current one.
pub fn validate_deadline_extension(
    milestone: &Milestone,
    new_ending_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    if new_ending_at <= milestone.ending_at {
        return Err(ValidationError::DeadlineNotExtended);
    }
    if new_ending_at <= now {
        return Err(ValidationError::DeadlineInPast);
    }
    Ok(new_ending_at)
}

/// Fields of the edit-milestone form; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneEdit {
    #[serde(default)]
    pub amount: Option<u128>,
    #[serde(default)]
    pub starting_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ending_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Option<Vec<TaskDraft>>,
    #[serde(default)]
    pub approvers: Option<Vec<String>>,
}

/// One on-chain call an edit decomposes into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditStep {
    AppendTasks(Vec<Task>),
    ExtendDeadline(DateTime<Utc>),
}

impl MilestoneEdit {
    /// Reduce the edit to the calls the contract offers.
    ///
    /// Tasks are append-only: the edited list must start with the existing
    /// tasks. Amount, start date and approvers have no setter on-chain, so
    /// changing them is rejected rather than silently dropped.
    pub fn plan(
        &self,
        milestone: &Milestone,
        now: DateTime<Utc>,
    ) -> Result<Vec<EditStep>, ValidationError> {
        let mut steps = Vec::new();

        if let Some(amount) = self.amount {
            if amount == 0 {
                return Err(ValidationError::NonPositiveAmount);
            }
            if amount != milestone.amount {
                return Err(ValidationError::UnsupportedEdit("amount"));
            }
        }

        if let Some(starting_at) = self.starting_at {
            if starting_at != milestone.starting_at {
                return Err(ValidationError::UnsupportedEdit("start date"));
            }
        }

        if let Some(raw) = &self.approvers {
            let approvers = collect_approvers(raw)?;
            let current: HashSet<_> = milestone.approvers.known().iter().collect();
            let edited: HashSet<_> = approvers.iter().collect();
            if !milestone.approvers.is_fully_known() || current != edited {
                return Err(ValidationError::UnsupportedEdit("approvers"));
            }
        }

        if let Some(drafts) = &self.tasks {
            let edited = collect_tasks(drafts)?;
            if edited.len() < milestone.tasks.len()
                || edited[..milestone.tasks.len()] != milestone.tasks[..]
            {
                return Err(ValidationError::UnsupportedEdit("existing tasks"));
            }
            let appended = edited[milestone.tasks.len()..].to_vec();
            if !appended.is_empty() {
                steps.push(EditStep::AppendTasks(appended));
            }
        }

        if let Some(ending_at) = self.ending_at {
            if ending_at != milestone.ending_at {
                let extended = validate_deadline_extension(milestone, ending_at, now)?;
                steps.push(EditStep::ExtendDeadline(extended));
            }
        }

        if steps.is_empty() {
            return Err(ValidationError::NoChanges);
        }
        Ok(steps)
    }
}
