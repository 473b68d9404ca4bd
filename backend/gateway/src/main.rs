//! DealBlock Gateway: entry point.
//!
//! Reads milestone escrow projects from the DealBlock contract over
//! JSON-RPC, runs the lifecycle guards locally and submits the contract
//! calls behind a small Axum REST API. Watched projects are re-polled in
//! the background and streamed to clients as server-sent events.

mod abi;
mod actions;
mod api;
mod config;
mod contract;
mod errors;
mod poller;
mod rpc;
mod token;
mod views;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use actions::ActionService;
use config::Config;
use contract::{Chain, EvmChain};
use poller::Poller;
use rpc::RpcClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let rpc = RpcClient::new(
        client,
        config.rpc_url.clone(),
        config.wallet_rpc_url.clone(),
    );

    match rpc.chain_id().await {
        Ok(id) => info!("Connected to {} (chain id {id})", config.rpc_url),
        Err(e) => warn!("Could not reach {}: {e}", config.rpc_url),
    }
    match config.account {
        Some(account) => info!("Sending transactions from {account}"),
        None => warn!("ACCOUNT_ADDRESS not set; write endpoints are disabled"),
    }

    let chain: Arc<dyn Chain> = Arc::new(EvmChain::new(
        rpc,
        config.dealblock_address,
        config.account,
        config.confirmation_timeout(),
        config.receipt_poll_interval(),
    ));

    // ─── Background polling ───────────────────────────────
    let poller = Arc::new(Poller::new(chain.clone(), config.poll_interval()));
    let actions = ActionService::new(chain.clone(), config.release_policy)
        .with_poller(poller.clone());

    // ─── REST API ─────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.api_port);
    info!(
        "DealBlock contract {} ({} tokens configured)",
        config.dealblock_address,
        config.tokens.symbols().count()
    );
    let state = Arc::new(api::AppState {
        config,
        chain,
        actions,
        poller,
    });

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
