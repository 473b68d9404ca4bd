//! Payment tokens: the symbol registry, the ERC20 calls the funding flow
//! needs, and the balance/allowance check run before `fund_Milestone`.

use std::fmt;
use std::str::FromStr;

use dealblock_lifecycle::{Address, ContractErrorCode, ValidationError};

use crate::abi::{Function, ParamType};
use crate::errors::{GatewayError, Result};

pub const BALANCE_OF: Function = Function {
    name: "balanceOf",
    inputs: &[ParamType::Address],
    outputs: &[ParamType::SaturatingUint(256)],
};

pub const ALLOWANCE: Function = Function {
    name: "allowance",
    inputs: &[ParamType::Address, ParamType::Address],
    outputs: &[ParamType::SaturatingUint(256)],
};

pub const APPROVE: Function = Function {
    name: "approve",
    inputs: &[ParamType::Address, ParamType::Uint(256)],
    outputs: &[ParamType::Bool],
};

/// Token symbol to contract address, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRegistry {
    tokens: Vec<(String, Address)>,
}

impl TokenRegistry {
    pub fn new(tokens: impl IntoIterator<Item = (String, Address)>) -> Self {
        TokenRegistry {
            tokens: tokens
                .into_iter()
                .map(|(symbol, address)| (symbol.to_ascii_uppercase(), address))
                .collect(),
        }
    }

    /// Symbols are matched case-insensitively.
    pub fn resolve(&self, symbol: &str) -> std::result::Result<Address, ValidationError> {
        let wanted = symbol.trim().to_ascii_uppercase();
        self.tokens
            .iter()
            .find(|(s, _)| *s == wanted)
            .map(|(_, address)| *address)
            .ok_or_else(|| ValidationError::UnknownToken(symbol.to_string()))
    }

    pub fn symbol_of(&self, address: &Address) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(_, a)| a == address)
            .map(|(s, _)| s.as_str())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|(s, _)| s.as_str())
    }
}

/// Parses `USDC=0x…,USDT=0x…`.
impl FromStr for TokenRegistry {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut tokens = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (symbol, raw) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected SYMBOL=ADDRESS, got {entry:?}"))?;
            let symbol = symbol.trim();
            if symbol.is_empty() {
                return Err(format!("missing symbol in {entry:?}"));
            }
            let address = Address::parse(raw).map_err(|e| e.to_string())?;
            tokens.push((symbol.to_string(), address));
        }
        if tokens.is_empty() {
            return Err("no tokens configured".to_string());
        }
        Ok(TokenRegistry::new(tokens))
    }
}

/// What has to happen before `fund_Milestone` can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingPlan {
    Ready,
    /// Allowance is short; approve the escrow for exactly `amount` first.
    ApproveFirst { amount: u128 },
}

impl fmt::Display for FundingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingPlan::Ready => f.write_str("ready"),
            FundingPlan::ApproveFirst { amount } => write!(f, "approve {amount} first"),
        }
    }
}

pub fn plan_funding(required: u128, balance: u128, allowance: u128) -> Result<FundingPlan> {
    if balance < required {
        return Err(GatewayError::Contract(ContractErrorCode::InsufficientBalance));
    }
    if allowance < required {
        Ok(FundingPlan::ApproveFirst { amount: required })
    } else {
        Ok(FundingPlan::Ready)
    }
}
