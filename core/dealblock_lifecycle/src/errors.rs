//! Error taxonomy for milestone operations.
//!
//! | Class           | Origin                          | Examples                                   |
//! |-----------------|---------------------------------|--------------------------------------------|
//! | `Validation`    | local, before any call          | malformed address, past deadline           |
//! | `Authorization` | role guard or contract revert   | `NOT_PAYEE`, `NOT_APPROVER`                |
//! | `Precondition`  | state guard or contract revert  | `NOT_IN_REVIEW`, `INSUFFICIENT_ALLOWANCE`  |
//! | `Transport`     | wallet / network                | signature rejected, timeout                |

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::machine::Action;
use crate::types::{Address, MilestoneStatus};

/// Fallback shown when a failure matches nothing in [`ContractErrorCode`].
pub const GENERIC_FAILURE_MESSAGE: &str = "Transaction failed";

/// Fallback shown for a revert whose reason could not be decoded.
pub const UNKNOWN_REVERT_MESSAGE: &str =
    "Transaction reverted. Check contract conditions and roles.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Authorization,
    Precondition,
    Transport,
}

/// Input rejected before anything is sent to the chain.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("The {0} address must not be the zero address")]
    ZeroAddress(&'static str),

    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    #[error("Invalid id: {0:?}")]
    InvalidId(String),

    #[error("Deadline must be in the future")]
    DeadlineInPast,

    #[error("New deadline must be later than the current deadline")]
    DeadlineNotExtended,

    #[error("Approver {0} is listed more than once")]
    DuplicateApprover(Address),

    #[error("At least one task with a title is required")]
    NoTasks,

    #[error("A project title is required")]
    MissingTitle,

    #[error("Unknown payment token: {0}")]
    UnknownToken(String),

    #[error("The {0} of a milestone cannot be changed on-chain")]
    UnsupportedEdit(&'static str),

    #[error("Nothing to change")]
    NoChanges,
}

impl ValidationError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// A transition refused by the local guard.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Project {0} is completed; its milestones can no longer change")]
    ProjectLocked(u64),

    #[error("Cannot {action} a milestone in status {status}")]
    WrongState {
        action: Action,
        status: MilestoneStatus,
    },

    #[error("Only the {required} can {action}")]
    WrongRole {
        action: &'static str,
        required: &'static str,
    },

    #[error("Milestone is locked for editing")]
    EditLocked,

    #[error("You have already approved this milestone")]
    AlreadyApproved,

    #[error("Not all approvers have signed off yet ({approved}/{required})")]
    ApprovalsPending { approved: u64, required: u64 },

    #[error("Milestone {0} does not exist")]
    UnknownMilestone(u64),
}

impl TransitionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::WrongRole { .. } => ErrorClass::Authorization,
            _ => ErrorClass::Precondition,
        }
    }

    /// The contract error this guard pre-empts, if the contract has one.
    pub fn contract_code(&self) -> Option<ContractErrorCode> {
        match self {
            Self::WrongRole { action, .. } => Some(match *action {
                "mark for review" => ContractErrorCode::NotPayee,
                "approve" => ContractErrorCode::NotApprover,
                "complete" => ContractErrorCode::NotAdmin,
                _ => ContractErrorCode::NotInitiator,
            }),
            Self::WrongState { action, status } => match (*action, *status) {
                (Action::Fund, status) if status != MilestoneStatus::Cancelled => {
                    Some(ContractErrorCode::AlreadyFunded)
                }
                (Action::MarkForReview, MilestoneStatus::Initialized) => {
                    Some(ContractErrorCode::NotFunded)
                }
                (Action::Approve | Action::Complete, _) => Some(ContractErrorCode::NotInReview),
                _ => None,
            },
            Self::AlreadyApproved => Some(ContractErrorCode::AlreadyApproved),
            Self::ApprovalsPending { .. } => Some(ContractErrorCode::ApprovalsPending),
            _ => None,
        }
    }

    /// Message shown to the user.
    pub fn user_message(&self) -> String {
        match self.contract_code() {
            Some(code) => code.message().to_string(),
            None => self.to_string(),
        }
    }
}

/// Named errors the DealBlock contract reverts with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractErrorCode {
    NotAdmin,
    NotInitiator,
    NotPayee,
    NotApprover,
    AlreadyFunded,
    NotFunded,
    NotInReview,
    ApprovalsPending,
    InsufficientBalance,
    InsufficientAllowance,
    InvalidDeadline,
    AlreadyApproved,
}

static ERROR_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"error\s+([A-Z_]+)").expect("static pattern"));

static BARE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Z_]+[A-Z])\b").expect("static pattern"));

impl ContractErrorCode {
    pub const ALL: [ContractErrorCode; 12] = [
        Self::NotAdmin,
        Self::NotInitiator,
        Self::NotPayee,
        Self::NotApprover,
        Self::AlreadyFunded,
        Self::NotFunded,
        Self::NotInReview,
        Self::ApprovalsPending,
        Self::InsufficientBalance,
        Self::InsufficientAllowance,
        Self::InvalidDeadline,
        Self::AlreadyApproved,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::NotAdmin => "NOT_ADMIN",
            Self::NotInitiator => "NOT_INITIATOR",
            Self::NotPayee => "NOT_PAYEE",
            Self::NotApprover => "NOT_APPROVER",
            Self::AlreadyFunded => "ALREADY_FUNDED",
            Self::NotFunded => "NOT_FUNDED",
            Self::NotInReview => "NOT_IN_REVIEW",
            Self::ApprovalsPending => "APPROVALS_PENDING",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::InsufficientAllowance => "INSUFFICIENT_ALLOWANCE",
            Self::InvalidDeadline => "INVALID_DEADLINE",
            Self::AlreadyApproved => "ALREADY_APPROVED",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.name() == name)
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::NotAdmin => "Only admin can perform this action",
            Self::NotInitiator => "Only the project creator can do this",
            Self::NotPayee => "Only the worker can mark work for review",
            Self::NotApprover => "You are not authorized to approve this milestone",
            Self::AlreadyFunded => "This milestone is already funded",
            Self::NotFunded => "Please fund the milestone before requesting review",
            Self::NotInReview => "Milestone must be in review status first",
            Self::ApprovalsPending => "Not all approvers have signed off yet",
            Self::InsufficientBalance => "You don't have enough tokens in your wallet",
            Self::InsufficientAllowance => "Please approve token spending first",
            Self::InvalidDeadline => "Deadline must be in the future",
            Self::AlreadyApproved => "You have already approved this milestone",
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            Self::NotAdmin | Self::NotInitiator | Self::NotPayee | Self::NotApprover => {
                ErrorClass::Authorization
            }
            _ => ErrorClass::Precondition,
        }
    }

    /// Find a known error name in a revert reason or node error message.
    ///
    /// Accepts `error NOT_PAYEE(...)` style messages, bare reason strings
    /// such as `NOT_PAYEE`, and `execution reverted: NOT_PAYEE`.
    pub fn parse_message(message: &str) -> Option<Self> {
        if let Some(code) = ERROR_NAME_PATTERN
            .captures(message)
            .and_then(|c| Self::from_name(&c[1]))
        {
            return Some(code);
        }
        BARE_NAME_PATTERN
            .captures_iter(message)
            .find_map(|c| Self::from_name(&c[1]))
    }
}
