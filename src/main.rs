//! Banker Joe Liquidation Bot
//!
//! Flash-loan liquidation bot for the Banker Joe lending markets on
//! Avalanche C-Chain.
//! - Underwater accounts from the lending subgraph, once per new block
//! - Largest-collateral / largest-covered-debt parameter selection
//! - `liquidateLoan` on the deployed flash-loan liquidator contract

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use banker_api::{SubgraphClient, DEFAULT_SUBGRAPH_URL};
use banker_chain::gas::{DEFAULT_GAS_PRICE_GWEI, DEFAULT_MAX_GAS_PRICE_GWEI};
use banker_chain::{BlockWatcher, GasModel, LiquidatorContract, TransactionSenderBuilder};
use banker_core::{
    BotConfig, LiquidationDispatcher, MarketRegistry, MonitorConfig, MonitorLoop,
    ParameterSelector, SeededPicker,
};

/// Environment variable names.
mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const LIQUIDATOR: &str = "LIQUIDATOR";
    pub const SUBGRAPH_URL: &str = "SUBGRAPH_URL";
    pub const CHAIN_ID: &str = "CHAIN_ID";
    pub const GAS_MODEL: &str = "GAS_MODEL";
    pub const GAS_PRICE_GWEI: &str = "GAS_PRICE_GWEI";
    pub const MAX_GAS_PRICE_GWEI: &str = "MAX_GAS_PRICE_GWEI";
}

/// Avalanche C-Chain.
const DEFAULT_CHAIN_ID: u64 = 43114;

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,banker_core=debug,banker_chain=debug")),
        )
        .init();

    // BOT_CONFIG (TOML path) wins over BOT_PROFILE
    let bot_config = BotConfig::from_env()?;
    bot_config.validate()?;
    bot_config.log_config();

    let config = load_config()?;
    info!(chain_id = config.chain_id, "Starting Banker Joe Liquidation Bot");

    let mut monitor = initialize_components(&bot_config, config).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing current cycle"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    monitor.run(cancel).await;
    Ok(())
}

/// Configuration loaded from environment.
struct Config {
    rpc_url: String,
    private_key: String,
    liquidator_contract: Address,
    subgraph_url: String,
    chain_id: u64,
    gas_model: GasModel,
}

fn load_config() -> Result<Config> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let chain_id = parse_env_or(env::CHAIN_ID, DEFAULT_CHAIN_ID)?;
    let gas_price_gwei = parse_env_or(env::GAS_PRICE_GWEI, DEFAULT_GAS_PRICE_GWEI)?;
    let max_gas_price_gwei = parse_env_or(env::MAX_GAS_PRICE_GWEI, DEFAULT_MAX_GAS_PRICE_GWEI)?;
    if !(gas_price_gwei > 0.0 && gas_price_gwei <= max_gas_price_gwei) {
        anyhow::bail!(
            "{} ({}) must be positive and at most {} ({})",
            env::GAS_PRICE_GWEI,
            gas_price_gwei,
            env::MAX_GAS_PRICE_GWEI,
            max_gas_price_gwei
        );
    }

    Ok(Config {
        rpc_url: get_env(env::RPC_URL)?,
        private_key: get_env(env::PRIVATE_KEY)?,
        liquidator_contract: get_env(env::LIQUIDATOR)?
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address for {}: {}", env::LIQUIDATOR, e))?,
        subgraph_url: get_env(env::SUBGRAPH_URL)
            .unwrap_or_else(|_| DEFAULT_SUBGRAPH_URL.to_string()),
        chain_id,
        gas_model: GasModel::from_name(
            &get_env(env::GAS_MODEL).unwrap_or_else(|_| "legacy".to_string()),
            gas_price_gwei,
            max_gas_price_gwei,
        ),
    })
}

/// Parse an optional environment variable, using `default` when unset.
fn parse_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

async fn initialize_components(
    bot_config: &BotConfig,
    config: Config,
) -> Result<MonitorLoop<SubgraphClient, LiquidatorContract, BlockWatcher>> {
    info!("Initializing components...");

    // Market registry
    let registry = Arc::new(MarketRegistry::from_config(&bot_config.markets()?)?);
    info!(market_count = registry.len(), "Market registry loaded");

    // Subgraph client (positions and prices)
    let timing = &bot_config.monitor;
    let subgraph = SubgraphClient::with_timeout(&config.subgraph_url, timing.request_timeout())?;
    info!(url = subgraph.url(), "Subgraph client configured");

    // Transaction sender and liquidator contract
    let tx_sender = Arc::new(
        TransactionSenderBuilder::new(&config.rpc_url, config.chain_id)
            .gas_model(config.gas_model)
            .rpc_timeout(timing.request_timeout())
            .receipt_timeout(timing.receipt_timeout())
            .build(&config.private_key)
            .await?,
    );
    let liquidator_contract = LiquidatorContract::with_sender(config.liquidator_contract, tx_sender);
    info!(contract = %liquidator_contract.address, "Liquidator contract configured");

    // Chain-head watcher
    let watcher = BlockWatcher::new(&config.rpc_url, timing.poll_interval())?
        .with_request_timeout(timing.request_timeout());

    let picker = SeededPicker::new(bot_config.selection.seed);
    let mut monitor = MonitorLoop::new(
        subgraph.clone(),
        LiquidationDispatcher::new(liquidator_contract),
        watcher,
        ParameterSelector::new(registry),
        picker,
        MonitorConfig::from(bot_config),
    );
    if bot_config.monitor.log_prices {
        monitor = monitor.with_price_source(Arc::new(subgraph));
    }

    info!("All components initialized");
    Ok(monitor)
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╔╗ ┌─┐┌┐┌┬┌─┌─┐┬─┐   ╦┌─┐┌─┐
    ╠╩╗├─┤│││├┴┐├┤ ├┬┘   ║│ │├┤
    ╚═╝┴ ┴┘└┘┴ ┴└─┘┴└─  ╚╝└─┘└─┘
    Liquidation Bot v0.1.0
    "#
    );
}
