//! Application-wide error types.

use dealblock_lifecycle::errors::{GENERIC_FAILURE_MESSAGE, UNKNOWN_REVERT_MESSAGE};
use dealblock_lifecycle::{ContractErrorCode, ErrorClass, TransitionError, ValidationError};
use thiserror::Error;

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        /// Hex revert payload, when the node returned one.
        data: Option<String>,
    },

    #[error("ABI error: {0}")]
    Abi(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Contract rejected the call: {}", .0.name())]
    Contract(ContractErrorCode),

    #[error("Transaction {tx_hash} reverted")]
    Reverted {
        tx_hash: String,
        reason: Option<String>,
    },

    #[error("Signature request was rejected")]
    SigningRejected,

    #[error("Transaction {0} was not confirmed in time")]
    ConfirmationTimeout(String),

    #[error("A transaction for milestone {index} of project {project_id} is already pending")]
    InFlight { project_id: u64, index: u64 },

    #[error("Project {0} not found")]
    ProjectNotFound(u64),

    #[error("Milestone {index} of project {project_id} not found")]
    MilestoneNotFound { project_id: u64, index: u64 },

    #[error("No signing account configured")]
    NoAccount,
}

impl GatewayError {
    /// Build from a JSON-RPC error object, recognising wallet rejection.
    pub fn from_rpc(code: i64, message: String, data: Option<String>) -> Self {
        if code == USER_REJECTED_CODE {
            GatewayError::SigningRejected
        } else {
            GatewayError::Rpc {
                code,
                message,
                data,
            }
        }
    }

    /// The contract error this failure corresponds to, if one can be recognised.
    pub fn contract_code(&self) -> Option<ContractErrorCode> {
        match self {
            GatewayError::Contract(code) => Some(*code),
            GatewayError::Transition(e) => e.contract_code(),
            GatewayError::Rpc { message, data, .. } => data
                .as_deref()
                .and_then(ContractErrorCode::parse_message)
                .or_else(|| ContractErrorCode::parse_message(message)),
            GatewayError::Reverted {
                reason: Some(reason),
                ..
            } => ContractErrorCode::parse_message(reason),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Validation(_) => ErrorClass::Validation,
            GatewayError::Transition(e) => e.class(),
            GatewayError::InFlight { .. }
            | GatewayError::ProjectNotFound(_)
            | GatewayError::MilestoneNotFound { .. } => ErrorClass::Precondition,
            _ => match self.contract_code() {
                Some(code) => code.class(),
                None => ErrorClass::Transport,
            },
        }
    }

    /// Message shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Validation(e) => e.to_string(),
            GatewayError::Transition(e) => e.user_message(),
            GatewayError::SigningRejected
            | GatewayError::ConfirmationTimeout(_)
            | GatewayError::InFlight { .. }
            | GatewayError::ProjectNotFound(_)
            | GatewayError::MilestoneNotFound { .. }
            | GatewayError::NoAccount => self.to_string(),
            _ => {
                if let Some(code) = self.contract_code() {
                    return code.message().to_string();
                }
                if self.is_revert() {
                    UNKNOWN_REVERT_MESSAGE.to_string()
                } else {
                    GENERIC_FAILURE_MESSAGE.to_string()
                }
            }
        }
    }

    fn is_revert(&self) -> bool {
        match self {
            GatewayError::Reverted { .. } => true,
            GatewayError::Rpc { message, data, .. } => {
                data.is_some() || message.to_ascii_lowercase().contains("revert")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
