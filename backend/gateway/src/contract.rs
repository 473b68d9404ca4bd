//! DealBlock contract adapter.
//!
//! [`Chain`] is the seam between orchestration and the network: reads return
//! lifecycle types, writes are simulated, submitted once, and confirmed by
//! polling for the receipt. [`EvmChain`] implements it over JSON-RPC.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealblock_lifecycle::validation::{split_tasks, ValidMilestone, ValidProject};
use dealblock_lifecycle::{
    Action, Address, Approvers, ContractErrorCode, Milestone, MilestoneStatus, Project, Task,
};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abi::{self, from_hex, Function, ParamType, Token};
use crate::errors::{GatewayError, Result};
use crate::rpc::{Receipt, RpcClient};
use crate::token::{ALLOWANCE, APPROVE, BALANCE_OF};

// ─────────────────────────────────────────────────────────
// ABI surface
// ─────────────────────────────────────────────────────────

const UINT: ParamType = ParamType::Uint(256);
const TASK: ParamType = ParamType::Tuple(&[ParamType::String, ParamType::String]);
const STRINGS: ParamType = ParamType::Array(&ParamType::String);
const ADDRESSES: ParamType = ParamType::Array(&ParamType::Address);
const MILESTONE_REF: &[ParamType] = &[UINT, UINT];

pub const GET_PROJECT: Function = Function {
    name: "getProject",
    inputs: &[UINT],
    outputs: &[
        ParamType::Address,
        ParamType::Address,
        ParamType::Address,
        ParamType::Address,
        ParamType::Bool,
        UINT,
    ],
};

pub const GET_MILESTONE: Function = Function {
    name: "getMilestone",
    inputs: MILESTONE_REF,
    outputs: &[
        UINT,
        UINT,
        UINT,
        ParamType::Uint(8),
        UINT,
        ParamType::Bool,
        ParamType::Address,
        ParamType::Address,
        ParamType::Address,
        ParamType::Array(&TASK),
        ParamType::Bool,
        ParamType::Bool,
    ],
};

pub const INITIALIZE_PROJECT: Function = Function {
    name: "initialize_Project",
    inputs: &[
        ParamType::Address,
        ParamType::Address,
        UINT,
        ParamType::String,
        ParamType::String,
        STRINGS,
        STRINGS,
        UINT,
        ADDRESSES,
    ],
    outputs: &[UINT, ParamType::Address],
};

pub const ADD_MILESTONE: Function = Function {
    name: "add_Milestone",
    inputs: &[UINT, UINT, STRINGS, STRINGS, UINT, ADDRESSES],
    outputs: &[UINT],
};

pub const ADD_TASK: Function = Function {
    name: "add_Task",
    inputs: &[UINT, UINT, STRINGS, STRINGS],
    outputs: &[],
};

pub const INCREASE_DEADLINE: Function = Function {
    name: "increase_Deadline",
    inputs: &[UINT, UINT, UINT],
    outputs: &[],
};

const fn milestone_call(name: &'static str) -> Function {
    Function {
        name,
        inputs: MILESTONE_REF,
        outputs: &[],
    }
}

pub const FUND_MILESTONE: Function = milestone_call("fund_Milestone");
pub const MARK_FOR_REVIEW: Function = milestone_call("mark_Milestone_For_Review");
pub const APPROVE_MILESTONE: Function = milestone_call("approve_Milestone");
pub const COMPLETE_MILESTONE: Function = milestone_call("complete_Milestone");
pub const FUND_RELEASE: Function = milestone_call("fund_Release");
pub const CANCEL_MILESTONE: Function = milestone_call("cancel_Milestone");

/// Contract function behind a status-changing action.
pub fn transition_function(action: Action) -> Option<Function> {
    match action {
        Action::Fund => Some(FUND_MILESTONE),
        Action::MarkForReview => Some(MARK_FOR_REVIEW),
        Action::Approve => Some(APPROVE_MILESTONE),
        Action::Complete => Some(COMPLETE_MILESTONE),
        Action::Release => Some(FUND_RELEASE),
        Action::Cancel => Some(CANCEL_MILESTONE),
        Action::ExtendDeadline | Action::AddTasks | Action::Edit => None,
    }
}

// ─────────────────────────────────────────────────────────
// Calls
// ─────────────────────────────────────────────────────────

/// One external write. Each is a single atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    InitializeProject(ValidProject),
    AddMilestone {
        project_id: u64,
        milestone: ValidMilestone,
    },
    Transition {
        action: Action,
        project_id: u64,
        index: u64,
    },
    AddTasks {
        project_id: u64,
        index: u64,
        tasks: Vec<Task>,
    },
    IncreaseDeadline {
        project_id: u64,
        index: u64,
        ending_at: DateTime<Utc>,
    },
    /// ERC20 `approve(spender, amount)` on `token`.
    ApproveToken {
        token: Address,
        spender: Address,
        amount: u128,
    },
}

impl ContractCall {
    pub fn function(&self) -> Result<Function> {
        Ok(match self {
            ContractCall::InitializeProject(_) => INITIALIZE_PROJECT,
            ContractCall::AddMilestone { .. } => ADD_MILESTONE,
            ContractCall::Transition { action, .. } => {
                transition_function(*action).ok_or_else(|| {
                    GatewayError::Abi(format!("no contract function for action {action:?}"))
                })?
            }
            ContractCall::AddTasks { .. } => ADD_TASK,
            ContractCall::IncreaseDeadline { .. } => INCREASE_DEADLINE,
            ContractCall::ApproveToken { .. } => APPROVE,
        })
    }

    /// Contract the call is sent to.
    pub fn target(&self, dealblock: Address) -> Address {
        match self {
            ContractCall::ApproveToken { token, .. } => *token,
            _ => dealblock,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let args = match self {
            ContractCall::InitializeProject(project) => {
                let m = &project.milestone;
                let (titles, descriptions) = split_tasks(&m.tasks);
                vec![
                    Token::Address(project.payee),
                    Token::Address(project.token),
                    timestamp_token(m.ending_at)?,
                    Token::String(project.title.clone()),
                    Token::String(project.description.clone()),
                    string_array(titles),
                    string_array(descriptions),
                    Token::Uint(m.amount),
                    address_array(&m.approvers),
                ]
            }
            ContractCall::AddMilestone {
                project_id,
                milestone,
            } => {
                let (titles, descriptions) = split_tasks(&milestone.tasks);
                vec![
                    Token::Uint(u128::from(*project_id)),
                    timestamp_token(milestone.ending_at)?,
                    string_array(titles),
                    string_array(descriptions),
                    Token::Uint(milestone.amount),
                    address_array(&milestone.approvers),
                ]
            }
            ContractCall::Transition {
                project_id, index, ..
            } => milestone_ref(*project_id, *index),
            ContractCall::AddTasks {
                project_id,
                index,
                tasks,
            } => {
                let (titles, descriptions) = split_tasks(tasks);
                let mut args = milestone_ref(*project_id, *index);
                args.push(string_array(titles));
                args.push(string_array(descriptions));
                args
            }
            ContractCall::IncreaseDeadline {
                project_id,
                index,
                ending_at,
            } => {
                let mut args = milestone_ref(*project_id, *index);
                args.push(timestamp_token(*ending_at)?);
                args
            }
            ContractCall::ApproveToken {
                spender, amount, ..
            } => vec![Token::Address(*spender), Token::Uint(*amount)],
        };
        self.function()?.encode_input(&args)
    }
}

fn milestone_ref(project_id: u64, index: u64) -> Vec<Token> {
    vec![
        Token::Uint(u128::from(project_id)),
        Token::Uint(u128::from(index)),
    ]
}

fn string_array(values: Vec<String>) -> Token {
    Token::Array(values.into_iter().map(Token::String).collect())
}

fn address_array(values: &[Address]) -> Token {
    Token::Array(values.iter().copied().map(Token::Address).collect())
}

fn timestamp_token(at: DateTime<Utc>) -> Result<Token> {
    let secs = u128::try_from(at.timestamp())
        .map_err(|_| GatewayError::Abi(format!("timestamp {at} precedes the epoch")))?;
    Ok(Token::Uint(secs))
}

fn timestamp_from(token: Token) -> Result<DateTime<Utc>> {
    let secs = token.into_u64()?;
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| GatewayError::Abi(format!("timestamp {secs} out of range")))
}

// ─────────────────────────────────────────────────────────
// Decoded reads
// ─────────────────────────────────────────────────────────

/// `getProject` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectHeader {
    pub vault: Address,
    pub initializer: Address,
    pub payee: Address,
    pub token: Address,
    pub completed: bool,
    pub milestone_count: u64,
}

impl ProjectHeader {
    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self> {
        let [vault, initializer, payee, token, completed, count]: [Token; 6] = tokens
            .try_into()
            .map_err(|_| GatewayError::Abi("getProject returned wrong arity".to_string()))?;
        Ok(ProjectHeader {
            vault: vault.into_address()?,
            initializer: initializer.into_address()?,
            payee: payee.into_address()?,
            token: token.into_address()?,
            completed: completed.into_bool()?,
            milestone_count: count.into_u64()?,
        })
    }
}

/// Build a [`Milestone`] from `getMilestone` output. Only the approver count
/// is on-chain, so membership is left unknown.
pub fn milestone_from_tokens(index: u64, tokens: Vec<Token>) -> Result<Milestone> {
    let [amount, starting_at, ending_at, status, approvers_len, edit_locked, _vault, _token, _payee, tasks, init_required, init_approved]: [Token; 12] =
        tokens
            .try_into()
            .map_err(|_| GatewayError::Abi("getMilestone returned wrong arity".to_string()))?;

    let code = status.into_uint()?;
    let status = u8::try_from(code)
        .ok()
        .and_then(MilestoneStatus::from_code)
        .ok_or_else(|| GatewayError::Abi(format!("unknown milestone status {code}")))?;

    let tasks = tasks
        .into_array()?
        .into_iter()
        .map(|task| {
            let [title, description]: [Token; 2] = task
                .into_tuple()?
                .try_into()
                .map_err(|_| GatewayError::Abi("task tuple has wrong arity".to_string()))?;
            Ok(Task::new(title.into_string()?, description.into_string()?))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Milestone {
        index,
        amount: amount.into_uint()?,
        starting_at: timestamp_from(starting_at)?,
        ending_at: timestamp_from(ending_at)?,
        status,
        approvers: Approvers::opaque(approvers_len.into_u64()?),
        tasks,
        edit_locked: edit_locked.into_bool()?,
        initializer_approval_required: init_required.into_bool()?,
        initializer_has_approved: init_approved.into_bool()?,
    })
}

/// A submitted write: its hash and the return values seen in simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub tx_hash: String,
    pub returned: Vec<Token>,
}

// ─────────────────────────────────────────────────────────
// Chain seam
// ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Chain: Send + Sync {
    fn dealblock_address(&self) -> Address;

    /// Account writes are sent from, if one is configured.
    fn account(&self) -> Option<Address>;

    async fn project_header(&self, project_id: u64) -> Result<ProjectHeader>;

    async fn milestone(&self, project_id: u64, index: u64) -> Result<Milestone>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<u128>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<u128>;

    /// Simulate, then submit. A simulated revert is returned without sending.
    async fn submit(&self, call: &ContractCall) -> Result<Submitted>;

    /// Wait until the transaction is mined. A reverted receipt is an error.
    async fn confirm(&self, call: &ContractCall, tx_hash: &str) -> Result<Receipt>;
}

/// Read a project and all its milestones. Milestone reads run concurrently.
pub async fn load_project(chain: &dyn Chain, project_id: u64) -> Result<Project> {
    let header = chain.project_header(project_id).await?;
    if header.initializer.is_zero() {
        return Err(GatewayError::ProjectNotFound(project_id));
    }
    let milestones = try_join_all(
        (0..header.milestone_count).map(|index| chain.milestone(project_id, index)),
    )
    .await?;
    debug!(
        "Loaded project {project_id} with {} milestones",
        milestones.len()
    );
    Ok(Project {
        id: project_id,
        vault: header.vault,
        initializer: header.initializer,
        payee: header.payee,
        token: header.token,
        completed: header.completed,
        milestones,
        title: None,
        description: None,
    })
}

/// Turn a node error carrying revert data into the contract error it names.
fn decode_revert_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Rpc {
            code,
            message,
            data: Some(raw),
        } => {
            let reason = from_hex(&raw).ok().and_then(|bytes| abi::decode_revert(&bytes));
            match reason {
                Some(reason) => match ContractErrorCode::parse_message(&reason) {
                    Some(contract_code) => GatewayError::Contract(contract_code),
                    None => GatewayError::Rpc {
                        code,
                        message,
                        data: Some(reason),
                    },
                },
                None => GatewayError::Rpc {
                    code,
                    message,
                    data: Some(raw),
                },
            }
        }
        other => other,
    }
}

pub struct EvmChain {
    rpc: RpcClient,
    dealblock: Address,
    account: Option<Address>,
    confirmation_timeout: Duration,
    receipt_poll: Duration,
}

impl EvmChain {
    pub fn new(
        rpc: RpcClient,
        dealblock: Address,
        account: Option<Address>,
        confirmation_timeout: Duration,
        receipt_poll: Duration,
    ) -> Self {
        EvmChain {
            rpc,
            dealblock,
            account,
            confirmation_timeout,
            receipt_poll,
        }
    }

    async fn read(&self, to: Address, function: Function, args: &[Token]) -> Result<Vec<Token>> {
        let data = function.encode_input(args)?;
        let raw = self
            .rpc
            .call(self.account, to, &data)
            .await
            .map_err(decode_revert_error)?;
        function.decode_output(&raw)
    }

    async fn read_uint(&self, to: Address, function: Function, args: &[Token]) -> Result<u128> {
        self.read(to, function, args)
            .await?
            .pop()
            .ok_or_else(|| GatewayError::Abi(format!("{} returned nothing", function.name)))?
            .into_uint()
    }
}

#[async_trait]
impl Chain for EvmChain {
    fn dealblock_address(&self) -> Address {
        self.dealblock
    }

    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn project_header(&self, project_id: u64) -> Result<ProjectHeader> {
        let tokens = self
            .read(
                self.dealblock,
                GET_PROJECT,
                &[Token::Uint(u128::from(project_id))],
            )
            .await?;
        ProjectHeader::from_tokens(tokens)
    }

    async fn milestone(&self, project_id: u64, index: u64) -> Result<Milestone> {
        let tokens = self
            .read(self.dealblock, GET_MILESTONE, &milestone_ref(project_id, index))
            .await?;
        milestone_from_tokens(index, tokens)
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<u128> {
        self.read_uint(token, BALANCE_OF, &[Token::Address(owner)])
            .await
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<u128> {
        self.read_uint(
            token,
            ALLOWANCE,
            &[Token::Address(owner), Token::Address(spender)],
        )
        .await
    }

    async fn submit(&self, call: &ContractCall) -> Result<Submitted> {
        let from = self.account.ok_or(GatewayError::NoAccount)?;
        let function = call.function()?;
        let to = call.target(self.dealblock);
        let data = call.encode()?;

        let simulated = self
            .rpc
            .call(Some(from), to, &data)
            .await
            .map_err(decode_revert_error)?;
        let returned = if function.outputs.is_empty() {
            Vec::new()
        } else {
            function.decode_output(&simulated)?
        };

        let tx_hash = self.rpc.send_transaction(from, to, &data).await?;
        info!("Submitted {} as {tx_hash}", function.name);
        Ok(Submitted { tx_hash, returned })
    }

    async fn confirm(&self, call: &ContractCall, tx_hash: &str) -> Result<Receipt> {
        let poll = async {
            loop {
                if let Some(receipt) = self.rpc.transaction_receipt(tx_hash).await? {
                    return Ok::<_, GatewayError>(receipt);
                }
                tokio::time::sleep(self.receipt_poll).await;
            }
        };
        let receipt = tokio::time::timeout(self.confirmation_timeout, poll)
            .await
            .map_err(|_| GatewayError::ConfirmationTimeout(tx_hash.to_string()))??;

        if receipt.succeeded() {
            info!("{tx_hash} confirmed in block {:?}", receipt.block_number);
            return Ok(receipt);
        }

        // Replaying against the latest state usually reproduces the reason.
        warn!("{tx_hash} reverted; replaying to recover the reason");
        let reason = match self.account {
            Some(from) => {
                let data = call.encode()?;
                match self.rpc.call(Some(from), call.target(self.dealblock), &data).await {
                    Err(GatewayError::Rpc { data: Some(raw), message, .. }) => from_hex(&raw)
                        .ok()
                        .and_then(|bytes| abi::decode_revert(&bytes))
                        .or(Some(message)),
                    Err(GatewayError::Rpc { message, .. }) => Some(message),
                    _ => None,
                }
            }
            None => None,
        };
        Err(GatewayError::Reverted {
            tx_hash: tx_hash.to_string(),
            reason,
        })
    }
}
