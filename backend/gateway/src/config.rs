//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use dealblock_lifecycle::amount::DEFAULT_TOKEN_DECIMALS;
use dealblock_lifecycle::{Address, ReleasePolicy};

use crate::errors::{GatewayError, Result};
use crate::token::TokenRegistry;

pub const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_DEALBLOCK_ADDRESS: &str = "0x85431F91eB780DAec02f2C21fff7a7f9728bc180";
pub const DEFAULT_TOKENS: &str = "USDC=0xE3F80d6Bf58794AD8d9d5E3Cb1BC6092b068108a,\
                                  USDT=0xdAC17F958D2ee523a2206206994597C13D831ec7";

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint used for reads and receipts
    pub rpc_url: String,
    /// Endpoint that signs `eth_sendTransaction` (a node with unlocked accounts
    /// or a wallet bridge). Defaults to `rpc_url`.
    pub wallet_rpc_url: String,
    /// The DealBlock escrow contract
    pub dealblock_address: Address,
    /// Account transactions are sent from; reads work without one
    pub account: Option<Address>,
    /// Payment tokens accepted by the contract, by symbol
    pub tokens: TokenRegistry,
    pub token_decimals: u32,
    /// Who may release an approved milestone's funds
    pub release_policy: ReleasePolicy,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) watched projects are re-read
    pub poll_interval_secs: u64,
    /// How long to wait for a receipt before giving up on a transaction
    pub confirmation_timeout_secs: u64,
    /// Delay between receipt polls
    pub receipt_poll_millis: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_url = var("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let wallet_rpc_url = var("WALLET_RPC_URL").unwrap_or_else(|| rpc_url.clone());

        let dealblock_address = parse_address(
            "DEALBLOCK_ADDRESS",
            &var("DEALBLOCK_ADDRESS").unwrap_or_else(|| DEFAULT_DEALBLOCK_ADDRESS.to_string()),
        )?;
        let account = var("ACCOUNT_ADDRESS")
            .map(|raw| parse_address("ACCOUNT_ADDRESS", &raw))
            .transpose()?;

        let tokens = var("TOKENS")
            .unwrap_or_else(|| DEFAULT_TOKENS.to_string())
            .parse::<TokenRegistry>()
            .map_err(|e| GatewayError::Config(format!("Invalid TOKENS: {e}")))?;

        let release_policy = var("RELEASE_POLICY")
            .map(|raw| {
                raw.parse::<ReleasePolicy>()
                    .map_err(|e| GatewayError::Config(format!("Invalid RELEASE_POLICY: {e}")))
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Config {
            rpc_url,
            wallet_rpc_url,
            dealblock_address,
            account,
            tokens,
            token_decimals: parse_or(&var, "TOKEN_DECIMALS", DEFAULT_TOKEN_DECIMALS)?,
            release_policy,
            api_port: parse_or(&var, "API_PORT", 3001)?,
            poll_interval_secs: parse_or(&var, "POLL_INTERVAL_SECS", 15)?,
            confirmation_timeout_secs: parse_or(&var, "CONFIRMATION_TIMEOUT_SECS", 120)?,
            receipt_poll_millis: parse_or(&var, "RECEIPT_POLL_MILLIS", 2000)?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_millis.max(1))
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("Invalid {key}"))),
        None => Ok(default),
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    Address::parse(raw).map_err(|_| GatewayError::Config(format!("Invalid {key}: {raw:?}")))
}
