//! Orchestration of milestone actions.
//!
//! Every operation follows the same shape: read the project, run the local
//! guard and validation, submit one or more writes, wait for each to be
//! mined, then read the project again. No status is ever written locally;
//! the returned project is always the post-confirmation read.
//!
//! A milestone accepts one pending operation at a time. A second request
//! for the same milestone is refused with [`GatewayError::InFlight`] until
//! the first one finishes or fails.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dealblock_lifecycle::validation::{
    collect_tasks, validate_deadline_extension, EditStep, MilestoneDraft, MilestoneEdit,
    ProjectDraft, TaskDraft,
};
use dealblock_lifecycle::{
    check_add_milestone, check_transition, Action, Address, GuardContext, Milestone, Project,
    ReleasePolicy, ViewerContext,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::contract::{load_project, Chain, ContractCall, Submitted};
use crate::errors::{GatewayError, Result};
use crate::poller::Poller;
use crate::token::{plan_funding, FundingPlan};

/// Key of a pending operation. `index` is `None` for project-level
/// operations such as adding a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct InFlightKey {
    project_id: u64,
    index: Option<u64>,
}

type InFlightSet = Arc<Mutex<HashSet<InFlightKey>>>;

/// Releases its key when dropped, including on early return or cancellation.
struct InFlightGuard {
    set: InFlightSet,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Result of a confirmed operation.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub tx_hashes: Vec<String>,
    /// The project as read after the last confirmation.
    pub project: Project,
    /// Index of a newly added milestone.
    pub milestone_index: Option<u64>,
}

pub struct ActionService {
    chain: Arc<dyn Chain>,
    release_policy: ReleasePolicy,
    in_flight: InFlightSet,
    poller: Option<Arc<Poller>>,
}

impl ActionService {
    pub fn new(chain: Arc<dyn Chain>, release_policy: ReleasePolicy) -> Self {
        ActionService {
            chain,
            release_policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            poller: None,
        }
    }

    /// Watchers of a project are refreshed after each confirmed write.
    pub fn with_poller(mut self, poller: Arc<Poller>) -> Self {
        self.poller = Some(poller);
        self
    }

    fn begin(&self, project_id: u64, index: Option<u64>) -> Result<InFlightGuard> {
        let key = InFlightKey { project_id, index };
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key) {
            return Err(GatewayError::InFlight {
                project_id,
                index: index.unwrap_or_default(),
            });
        }
        Ok(InFlightGuard {
            set: self.in_flight.clone(),
            key,
        })
    }

    fn account(&self) -> Result<Address> {
        self.chain.account().ok_or(GatewayError::NoAccount)
    }

    async fn load(&self, project_id: u64) -> Result<(Project, ViewerContext)> {
        let account = self.account()?;
        let project = load_project(self.chain.as_ref(), project_id).await?;
        let viewer = ViewerContext::for_project(&project, Some(account));
        Ok((project, viewer))
    }

    fn guard(
        &self,
        action: Action,
        project: &Project,
        viewer: &ViewerContext,
        index: u64,
    ) -> Result<Milestone> {
        let milestone = project
            .milestone(index)
            .ok_or(GatewayError::MilestoneNotFound {
                project_id: project.id,
                index,
            })?;
        let ctx = GuardContext {
            project,
            viewer,
            release_policy: self.release_policy,
        };
        check_transition(action, milestone, &ctx)?;
        Ok(milestone.clone())
    }

    /// Submit one write and wait for it to be mined.
    async fn execute(&self, call: ContractCall) -> Result<Submitted> {
        let submitted = self.chain.submit(&call).await?;
        self.chain.confirm(&call, &submitted.tx_hash).await?;
        Ok(submitted)
    }

    async fn finish(
        &self,
        project_id: u64,
        tx_hashes: Vec<String>,
        milestone_index: Option<u64>,
    ) -> Result<Outcome> {
        let project = load_project(self.chain.as_ref(), project_id).await?;
        if let Some(poller) = &self.poller {
            poller.refresh(project_id);
        }
        Ok(Outcome {
            tx_hashes,
            project,
            milestone_index,
        })
    }

    /// Fund, mark for review, approve, complete, release or cancel.
    pub async fn transition(&self, project_id: u64, index: u64, action: Action) -> Result<Outcome> {
        if action == Action::Fund {
            return self.fund(project_id, index).await;
        }
        let _guard = self.begin(project_id, Some(index))?;
        let (project, viewer) = self.load(project_id).await?;
        self.guard(action, &project, &viewer, index)?;

        let call = ContractCall::Transition {
            action,
            project_id,
            index,
        };
        let submitted = self.execute(call).await?;
        info!("{action} on milestone {index} of project {project_id} confirmed");
        self.finish(project_id, vec![submitted.tx_hash], None).await
    }

    /// Approve the escrow for the milestone amount if the allowance is short,
    /// then fund.
    pub async fn fund(&self, project_id: u64, index: u64) -> Result<Outcome> {
        let _guard = self.begin(project_id, Some(index))?;
        let (project, viewer) = self.load(project_id).await?;
        let milestone = self.guard(Action::Fund, &project, &viewer, index)?;

        let owner = self.account()?;
        let spender = self.chain.dealblock_address();
        let balance = self.chain.balance_of(project.token, owner).await?;
        let allowance = self.chain.allowance(project.token, owner, spender).await?;
        let plan = plan_funding(milestone.amount, balance, allowance)?;
        info!("Funding milestone {index} of project {project_id}: {plan}");

        let mut tx_hashes = Vec::new();
        if let FundingPlan::ApproveFirst { amount } = plan {
            let approval = self
                .execute(ContractCall::ApproveToken {
                    token: project.token,
                    spender,
                    amount,
                })
                .await?;
            tx_hashes.push(approval.tx_hash);
        }

        let funded = self
            .execute(ContractCall::Transition {
                action: Action::Fund,
                project_id,
                index,
            })
            .await?;
        tx_hashes.push(funded.tx_hash);
        self.finish(project_id, tx_hashes, None).await
    }

    pub async fn add_tasks(
        &self,
        project_id: u64,
        index: u64,
        drafts: &[TaskDraft],
    ) -> Result<Outcome> {
        let _guard = self.begin(project_id, Some(index))?;
        let (project, viewer) = self.load(project_id).await?;
        self.guard(Action::AddTasks, &project, &viewer, index)?;
        let tasks = collect_tasks(drafts)?;

        let submitted = self
            .execute(ContractCall::AddTasks {
                project_id,
                index,
                tasks,
            })
            .await?;
        self.finish(project_id, vec![submitted.tx_hash], None).await
    }

    pub async fn extend_deadline(
        &self,
        project_id: u64,
        index: u64,
        ending_at: DateTime<Utc>,
    ) -> Result<Outcome> {
        let _guard = self.begin(project_id, Some(index))?;
        let (project, viewer) = self.load(project_id).await?;
        let milestone = self.guard(Action::ExtendDeadline, &project, &viewer, index)?;
        let ending_at = validate_deadline_extension(&milestone, ending_at, Utc::now())?;

        let submitted = self
            .execute(ContractCall::IncreaseDeadline {
                project_id,
                index,
                ending_at,
            })
            .await?;
        self.finish(project_id, vec![submitted.tx_hash], None).await
    }

    /// Apply an edit as the sequence of calls the contract supports. Steps
    /// run in order; a failure stops the sequence and earlier confirmed
    /// steps stay applied.
    pub async fn edit(&self, project_id: u64, index: u64, edit: &MilestoneEdit) -> Result<Outcome> {
        let _guard = self.begin(project_id, Some(index))?;
        let (project, viewer) = self.load(project_id).await?;
        let milestone = self.guard(Action::Edit, &project, &viewer, index)?;
        let steps = edit.plan(&milestone, Utc::now())?;

        let mut tx_hashes = Vec::with_capacity(steps.len());
        for step in steps {
            let call = match step {
                EditStep::AppendTasks(tasks) => ContractCall::AddTasks {
                    project_id,
                    index,
                    tasks,
                },
                EditStep::ExtendDeadline(ending_at) => ContractCall::IncreaseDeadline {
                    project_id,
                    index,
                    ending_at,
                },
            };
            match self.execute(call).await {
                Ok(submitted) => tx_hashes.push(submitted.tx_hash),
                Err(e) => {
                    if !tx_hashes.is_empty() {
                        warn!(
                            "Edit of milestone {index} of project {project_id} stopped after {} confirmed steps: {e}",
                            tx_hashes.len()
                        );
                    }
                    return Err(e);
                }
            }
        }
        self.finish(project_id, tx_hashes, None).await
    }

    pub async fn add_milestone(&self, project_id: u64, draft: &MilestoneDraft) -> Result<Outcome> {
        let _guard = self.begin(project_id, None)?;
        let (project, viewer) = self.load(project_id).await?;
        check_add_milestone(&project, &viewer)?;
        let milestone = draft.validate(Utc::now())?;

        let submitted = self
            .execute(ContractCall::AddMilestone {
                project_id,
                milestone,
            })
            .await?;
        let index = submitted
            .returned
            .into_iter()
            .next()
            .map(|t| t.into_u64())
            .transpose()?;
        self.finish(project_id, vec![submitted.tx_hash], index).await
    }

    /// Create a project with its first milestone. The new id comes from
    /// simulating the call just before submission.
    pub async fn initialize_project(&self, draft: &ProjectDraft) -> Result<Outcome> {
        self.account()?;
        let project = draft.validate(Utc::now())?;

        let submitted = self
            .execute(ContractCall::InitializeProject(project))
            .await?;
        let project_id = submitted
            .returned
            .into_iter()
            .next()
            .ok_or_else(|| {
                GatewayError::Abi("initialize_Project returned no project id".to_string())
            })?
            .into_u64()?;
        info!("Project {project_id} created");
        self.finish(project_id, vec![submitted.tx_hash], Some(0))
            .await
    }
}
