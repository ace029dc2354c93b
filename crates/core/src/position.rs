//! Borrower positions as seen in one snapshot.
//!
//! Positions are rebuilt on every fetch and carry no identity beyond it.

use alloy::primitives::Address;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PositionError {
    #[error("borrower {borrower} lists market {market} more than once")]
    DuplicateMarket { borrower: Address, market: Address },

    #[error("market {market}: {field} must be a finite non-negative number, got {value}")]
    InvalidAmount {
        market: Address,
        field: &'static str,
        value: f64,
    },
}

/// Balance of one borrower in one market, in underlying units.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalance {
    /// jToken market
    pub market: Address,
    pub symbol: String,
    pub supplied_underlying: f64,
    pub borrowed_underlying: f64,
    /// Supply is posted as collateral
    pub entered_market: bool,
}

impl TokenBalance {
    /// Collateral that can be seized.
    #[inline]
    pub fn is_seizable(&self) -> bool {
        self.entered_market && self.supplied_underlying > 0.0
    }
}

/// One borrower's account.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub borrower: Address,
    balances: Vec<TokenBalance>,
    pub total_borrow_value_usd: f64,
    pub total_collateral_value_usd: f64,
    /// Health as reported by the source (< 1 is liquidatable)
    pub health: Option<f64>,
}

impl Position {
    /// Build a position, checking that each market appears once and every
    /// amount is a finite non-negative number.
    pub fn new(
        borrower: Address,
        balances: Vec<TokenBalance>,
        total_borrow_value_usd: f64,
        total_collateral_value_usd: f64,
    ) -> Result<Self, PositionError> {
        let mut seen = HashSet::with_capacity(balances.len());
        for balance in &balances {
            if !seen.insert(balance.market) {
                return Err(PositionError::DuplicateMarket {
                    borrower,
                    market: balance.market,
                });
            }
            check_amount(balance.market, "supplied_underlying", balance.supplied_underlying)?;
            check_amount(balance.market, "borrowed_underlying", balance.borrowed_underlying)?;
        }

        Ok(Self {
            borrower,
            balances,
            total_borrow_value_usd,
            total_collateral_value_usd,
            health: None,
        })
    }

    pub fn with_health(mut self, health: Option<f64>) -> Self {
        self.health = health;
        self
    }

    /// Balances in source order.
    pub fn balances(&self) -> &[TokenBalance] {
        &self.balances
    }

    pub fn balance(&self, market: Address) -> Option<&TokenBalance> {
        self.balances.iter().find(|b| b.market == market)
    }
}

fn check_amount(market: Address, field: &'static str, value: f64) -> Result<(), PositionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PositionError::InvalidAmount { market, field, value })
    }
}
