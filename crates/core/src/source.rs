//! Snapshot sources: where underwater positions and prices come from.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use banker_api::{AccountFilter, SubgraphAccount, SubgraphClient, SubgraphError};

use crate::config::SnapshotConfig;
use crate::position::{Position, TokenBalance};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network, HTTP or query failure.
    #[error("snapshot transport failure: {0}")]
    Transport(String),

    /// The response as a whole could not be used.
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

impl From<SubgraphError> for SourceError {
    fn from(err: SubgraphError) -> Self {
        match err {
            SubgraphError::Malformed(msg) => SourceError::Malformed(msg),
            other => SourceError::Transport(other.to_string()),
        }
    }
}

/// Health and size window for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotQuery {
    pub health_lower_bound: f64,
    pub health_upper_bound: f64,
    pub min_borrow_value_usd: f64,
}

impl Default for SnapshotQuery {
    fn default() -> Self {
        Self::from(&SnapshotConfig::default())
    }
}

impl From<&SnapshotConfig> for SnapshotQuery {
    fn from(config: &SnapshotConfig) -> Self {
        Self {
            health_lower_bound: config.health_lower_bound,
            health_upper_bound: config.health_upper_bound,
            min_borrow_value_usd: config.min_borrow_value_usd,
        }
    }
}

/// Provides the positions to consider in one cycle.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Positions inside the window, in source order. Entries that cannot
    /// be turned into a [`Position`] are dropped with a warning.
    async fn fetch_positions(&self, query: &SnapshotQuery) -> Result<Vec<Position>, SourceError>;
}

/// Symbol → USD price. Informational only.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self) -> Result<HashMap<String, f64>, SourceError>;
}

#[async_trait]
impl PositionSource for SubgraphClient {
    async fn fetch_positions(&self, query: &SnapshotQuery) -> Result<Vec<Position>, SourceError> {
        let filter = AccountFilter {
            health_gt: query.health_lower_bound,
            health_lt: query.health_upper_bound,
            borrow_value_usd_gt: query.min_borrow_value_usd,
        };
        let accounts = self.fetch_underwater_accounts(&filter).await?;
        Ok(positions_from_accounts(accounts))
    }
}

#[async_trait]
impl PriceSource for SubgraphClient {
    async fn fetch_prices(&self) -> Result<HashMap<String, f64>, SourceError> {
        Ok(self.fetch_underlying_prices().await?)
    }
}

/// Convert subgraph accounts, dropping the ones that do not form a valid position.
pub fn positions_from_accounts(accounts: Vec<SubgraphAccount>) -> Vec<Position> {
    accounts
        .into_iter()
        .filter_map(|account| {
            let borrower = account.id;
            match position_from_account(account) {
                Ok(position) => Some(position),
                Err(reason) => {
                    warn!(borrower = %borrower, reason = %reason, "Skipping malformed account");
                    None
                }
            }
        })
        .collect()
}

fn position_from_account(account: SubgraphAccount) -> Result<Position, String> {
    let balances = account
        .tokens
        .into_iter()
        .map(|token| {
            let market = token
                .market()
                .ok_or_else(|| format!("token id '{}' has no market address", token.id))?;
            Ok(TokenBalance {
                market,
                symbol: token.symbol,
                supplied_underlying: token.supply_balance_underlying,
                borrowed_underlying: token.borrow_balance_underlying,
                entered_market: token.entered_market,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Position::new(
        account.id,
        balances,
        account.total_borrow_value_usd,
        account.total_collateral_value_usd,
    )
    .map(|p| p.with_health(account.health))
    .map_err(|e| e.to_string())
}
