//! In-memory chain double and fixtures for gateway tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dealblock_lifecycle::{
    Action, Address, Approvers, ContractErrorCode, Milestone, MilestoneStatus, Project, Task,
};
use tokio::sync::Notify;

use crate::abi::Token;
use crate::contract::{Chain, ContractCall, ProjectHeader, Submitted};
use crate::errors::{GatewayError, Result};
use crate::rpc::Receipt;
use crate::token::TokenRegistry;

pub const DEALBLOCK: Address = Address::from_bytes([0xDB; 20]);

pub fn addr(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

/// `USDC` is the sample projects' token.
pub fn tokens() -> TokenRegistry {
    TokenRegistry::new([
        ("USDC".to_string(), addr(0x33)),
        ("USDT".to_string(), addr(0x34)),
    ])
}

pub fn sample_milestone(index: u64, status: MilestoneStatus) -> Milestone {
    let now = Utc::now();
    Milestone {
        index,
        amount: 5000,
        starting_at: now - Duration::days(1),
        ending_at: now + Duration::days(14),
        status,
        approvers: Approvers::from_addresses(vec![addr(0xA1), addr(0xA2)]),
        tasks: vec![Task::new("Homepage Redesign", "Design and implement new homepage")],
        edit_locked: status != MilestoneStatus::Initialized,
        initializer_approval_required: false,
        initializer_has_approved: false,
    }
}

/// Initializer `0x11…`, payee `0x22…`, token USDC (`0x33…`), vault `0x44…`.
pub fn sample_project(id: u64, statuses: &[MilestoneStatus]) -> Project {
    Project {
        id,
        vault: addr(0x44),
        initializer: addr(0x11),
        payee: addr(0x22),
        token: addr(0x33),
        completed: false,
        milestones: statuses
            .iter()
            .enumerate()
            .map(|(i, s)| sample_milestone(i as u64, *s))
            .collect(),
        title: None,
        description: None,
    }
}

#[derive(Default)]
struct FakeState {
    account: Option<Address>,
    projects: HashMap<u64, Project>,
    /// (token, owner) → balance
    balances: HashMap<(Address, Address), u128>,
    /// (token, owner, spender) → allowance
    allowances: HashMap<(Address, Address, Address), u128>,
    submitted: Vec<ContractCall>,
    revert_next: Option<ContractErrorCode>,
    next_tx: u64,
}

/// Applies each submitted call to its own state the way the contract would.
/// Approver membership is not exposed, matching the real read path.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeState>,
    header_reads: AtomicUsize,
    confirm_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_project(self, project: Project) -> Self {
        self.state().projects.insert(project.id, project);
        self
    }

    pub fn set_account(&self, account: Option<Address>) {
        self.state().account = account;
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: u128) {
        self.state().balances.insert((token, owner), amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: u128) {
        self.state().allowances.insert((token, owner, spender), amount);
    }

    pub fn revert_next(&self, code: ContractErrorCode) {
        self.state().revert_next = Some(code);
    }

    pub fn update_project(&self, id: u64, f: impl FnOnce(&mut Project)) {
        if let Some(p) = self.state().projects.get_mut(&id) {
            f(p);
        }
    }

    /// Hold every `confirm` until the returned gate is notified.
    pub fn gate_confirmations(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.confirm_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn submitted(&self) -> Vec<ContractCall> {
        self.state().submitted.clone()
    }

    pub fn project(&self, id: u64) -> Option<Project> {
        self.state().projects.get(&id).cloned()
    }

    pub fn header_reads(&self) -> usize {
        self.header_reads.load(Ordering::SeqCst)
    }

    fn apply(state: &mut FakeState, call: &ContractCall) -> Result<Vec<Token>> {
        let account = state.account.ok_or(GatewayError::NoAccount)?;
        match call {
            ContractCall::ApproveToken {
                token,
                spender,
                amount,
            } => {
                state
                    .allowances
                    .insert((*token, account, *spender), *amount);
                Ok(vec![Token::Bool(true)])
            }
            ContractCall::Transition {
                action,
                project_id,
                index,
            } => {
                let project = state
                    .projects
                    .get(project_id)
                    .cloned()
                    .ok_or(GatewayError::ProjectNotFound(*project_id))?;
                let m = project
                    .milestone(*index)
                    .cloned()
                    .ok_or(GatewayError::MilestoneNotFound {
                        project_id: *project_id,
                        index: *index,
                    })?;
                if *action == Action::Fund {
                    let allowance = state
                        .allowances
                        .get(&(project.token, account, DEALBLOCK))
                        .copied()
                        .unwrap_or(0);
                    if allowance < m.amount {
                        return Err(GatewayError::Contract(
                            ContractErrorCode::InsufficientAllowance,
                        ));
                    }
                    let balance = state.balances.entry((project.token, account)).or_default();
                    *balance = balance.saturating_sub(m.amount);
                }
                let approver_sign_off_only = *action == Action::Approve
                    && m.initializer_approval_required
                    && !m.approvers.is_empty();
                let target = state
                    .projects
                    .get_mut(project_id)
                    .and_then(|p| p.milestones.iter_mut().find(|x| x.index == *index))
                    .ok_or(GatewayError::ProjectNotFound(*project_id))?;
                if *action == Action::Approve && account == project.initializer {
                    target.initializer_has_approved = true;
                }
                if !approver_sign_off_only {
                    target.status = action.target(target.status);
                }
                if *action == Action::Fund {
                    target.edit_locked = true;
                }
                Ok(Vec::new())
            }
            ContractCall::AddTasks {
                project_id,
                index,
                tasks,
            } => {
                let m = milestone_mut(state, *project_id, *index)?;
                m.tasks.extend(tasks.iter().cloned());
                Ok(Vec::new())
            }
            ContractCall::IncreaseDeadline {
                project_id,
                index,
                ending_at,
            } => {
                milestone_mut(state, *project_id, *index)?.ending_at = *ending_at;
                Ok(Vec::new())
            }
            ContractCall::AddMilestone {
                project_id,
                milestone,
            } => {
                let project = state
                    .projects
                    .get_mut(project_id)
                    .ok_or(GatewayError::ProjectNotFound(*project_id))?;
                let index = project.milestones.len() as u64;
                project.milestones.push(Milestone {
                    index,
                    amount: milestone.amount,
                    starting_at: Utc::now(),
                    ending_at: milestone.ending_at,
                    status: MilestoneStatus::Initialized,
                    approvers: Approvers::opaque(milestone.approvers.len() as u64),
                    tasks: milestone.tasks.clone(),
                    edit_locked: false,
                    initializer_approval_required: false,
                    initializer_has_approved: false,
                });
                Ok(vec![Token::Uint(u128::from(index))])
            }
            ContractCall::InitializeProject(draft) => {
                let id = state.projects.keys().max().copied().unwrap_or(0) + 1;
                let m = &draft.milestone;
                state.projects.insert(
                    id,
                    Project {
                        id,
                        vault: addr(0x44),
                        initializer: account,
                        payee: draft.payee,
                        token: draft.token,
                        completed: false,
                        milestones: vec![Milestone {
                            index: 0,
                            amount: m.amount,
                            starting_at: Utc::now(),
                            ending_at: m.ending_at,
                            status: MilestoneStatus::Initialized,
                            approvers: Approvers::opaque(m.approvers.len() as u64),
                            tasks: m.tasks.clone(),
                            edit_locked: false,
                            initializer_approval_required: false,
                            initializer_has_approved: false,
                        }],
                        title: None,
                        description: None,
                    },
                );
                Ok(vec![Token::Uint(u128::from(id)), Token::Address(addr(0x44))])
            }
        }
    }
}

fn milestone_mut(state: &mut FakeState, project_id: u64, index: u64) -> Result<&mut Milestone> {
    state
        .projects
        .get_mut(&project_id)
        .and_then(|p| p.milestones.iter_mut().find(|m| m.index == index))
        .ok_or(GatewayError::MilestoneNotFound { project_id, index })
}

#[async_trait]
impl Chain for FakeChain {
    fn dealblock_address(&self) -> Address {
        DEALBLOCK
    }

    fn account(&self) -> Option<Address> {
        self.state().account
    }

    async fn project_header(&self, project_id: u64) -> Result<ProjectHeader> {
        self.header_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        // Unknown ids read as an all-zero struct, like the contract.
        Ok(match state.projects.get(&project_id) {
            Some(p) => ProjectHeader {
                vault: p.vault,
                initializer: p.initializer,
                payee: p.payee,
                token: p.token,
                completed: p.completed,
                milestone_count: p.milestones.len() as u64,
            },
            None => ProjectHeader {
                vault: Address::ZERO,
                initializer: Address::ZERO,
                payee: Address::ZERO,
                token: Address::ZERO,
                completed: false,
                milestone_count: 0,
            },
        })
    }

    async fn milestone(&self, project_id: u64, index: u64) -> Result<Milestone> {
        let state = self.state();
        let mut m = state
            .projects
            .get(&project_id)
            .and_then(|p| p.milestone(index))
            .cloned()
            .ok_or(GatewayError::MilestoneNotFound { project_id, index })?;
        m.approvers = Approvers::opaque(m.approvers.len());
        Ok(m)
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<u128> {
        Ok(self
            .state()
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(0))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<u128> {
        Ok(self
            .state()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(0))
    }

    async fn submit(&self, call: &ContractCall) -> Result<Submitted> {
        let mut state = self.state();
        if let Some(code) = state.revert_next.take() {
            return Err(GatewayError::Contract(code));
        }
        let returned = Self::apply(&mut state, call)?;
        state.submitted.push(call.clone());
        state.next_tx += 1;
        Ok(Submitted {
            tx_hash: format!("0x{:064x}", state.next_tx),
            returned,
        })
    }

    async fn confirm(&self, _call: &ContractCall, tx_hash: &str) -> Result<Receipt> {
        let gate = self.confirm_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(Receipt {
            transaction_hash: tx_hash.to_string(),
            block_number: Some("0x1".to_string()),
            status: Some("0x1".to_string()),
        })
    }
}
