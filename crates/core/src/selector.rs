//! Liquidation parameter selection.
//!
//! For one position, picks the collateral to seize (largest entered
//! supply), the debt to repay (largest entered borrow whose half is covered
//! by that supply) and a flash-loan market distinct from both. No I/O.

use alloy::primitives::Address;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::iter::FusedIterator;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use banker_chain::LiquidateLoanArgs;

use crate::position::{Position, TokenBalance};
use crate::registry::MarketRegistry;

/// Source of the flash-loan pick.
pub trait FlashLoanPicker {
    /// Index in `0..n`. Only called with `n > 0`.
    fn pick(&mut self, n: usize) -> usize;
}

impl<P: FlashLoanPicker + ?Sized> FlashLoanPicker for &mut P {
    fn pick(&mut self, n: usize) -> usize {
        (**self).pick(n)
    }
}

/// Uniform pick from a seedable PRNG.
#[derive(Debug, Clone)]
pub struct SeededPicker {
    rng: StdRng,
}

impl SeededPicker {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::from_seed)
    }
}

impl FlashLoanPicker for SeededPicker {
    fn pick(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }
}

/// Arguments for one `liquidateLoan` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationParameters {
    pub borrower: Address,
    pub repay_market: Address,
    pub repay_underlying: Address,
    pub seize_market: Address,
    pub seize_underlying: Address,
    pub flash_loan_market: Address,
    pub flash_loan_underlying: Address,
}

impl From<LiquidationParameters> for LiquidateLoanArgs {
    fn from(p: LiquidationParameters) -> Self {
        LiquidateLoanArgs {
            borrower: p.borrower,
            repay_market: p.repay_market,
            repay_underlying: p.repay_underlying,
            seize_market: p.seize_market,
            seize_underlying: p.seize_underlying,
            flash_loan_market: p.flash_loan_market,
            flash_loan_underlying: p.flash_loan_underlying,
        }
    }
}

/// Result of selecting on one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Liquidate(LiquidationParameters),
    /// No entered market with a positive supply
    NoEligibleCollateral,
    /// No entered market whose half-debt the chosen collateral covers
    NoEligibleDebt,
    /// Registry has no market besides the repay and seize markets
    NoFlashLoanMarket,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("borrower {borrower}: market {market} is not in the registry")]
    UnknownMarket { borrower: Address, market: Address },
}

/// Per-reason counts for one pass over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub selected: usize,
    pub no_eligible_collateral: usize,
    pub no_eligible_debt: usize,
    pub no_flash_loan_market: usize,
    pub unknown_market: usize,
}

impl SelectionStats {
    pub fn skipped(&self) -> usize {
        self.no_eligible_collateral
            + self.no_eligible_debt
            + self.no_flash_loan_market
            + self.unknown_market
    }
}

/// Chooses liquidation parameters against a fixed market registry.
#[derive(Debug, Clone)]
pub struct ParameterSelector {
    registry: Arc<MarketRegistry>,
}

impl ParameterSelector {
    pub fn new(registry: Arc<MarketRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    /// Select parameters for one position.
    pub fn select<P: FlashLoanPicker + ?Sized>(
        &self,
        position: &Position,
        picker: &mut P,
    ) -> Result<Selection, SelectorError> {
        let balances = position.balances();

        let Some(seize) = first_max_by(balances.iter().filter(|b| b.is_seizable()), |b| {
            b.supplied_underlying
        }) else {
            return Ok(Selection::NoEligibleCollateral);
        };

        // Full repay-and-seize only: half the debt must be covered by the seized supply
        let repayable = balances
            .iter()
            .filter(|b| b.entered_market && b.borrowed_underlying / 2.0 < seize.supplied_underlying);
        let Some(repay) = first_max_by(repayable, |b| b.borrowed_underlying) else {
            return Ok(Selection::NoEligibleDebt);
        };

        let repay_underlying = self.lookup(position.borrower, repay.market)?;
        let seize_underlying = self.lookup(position.borrower, seize.market)?;

        let candidates: Vec<Address> = self
            .registry
            .all_markets()
            .filter(|&m| m != repay.market && m != seize.market)
            .collect();
        if candidates.is_empty() {
            return Ok(Selection::NoFlashLoanMarket);
        }
        let flash_loan_market = candidates[picker.pick(candidates.len()) % candidates.len()];
        let flash_loan_underlying = self.lookup(position.borrower, flash_loan_market)?;

        Ok(Selection::Liquidate(LiquidationParameters {
            borrower: position.borrower,
            repay_market: repay.market,
            repay_underlying,
            seize_market: seize.market,
            seize_underlying,
            flash_loan_market,
            flash_loan_underlying,
        }))
    }

    /// Lazy pass over `positions`, yielding parameters for eligible ones.
    pub fn parameters<'a, P: FlashLoanPicker>(
        &'a self,
        positions: &'a [Position],
        picker: P,
    ) -> ParameterSequence<'a, P> {
        ParameterSequence {
            selector: self,
            positions,
            picker,
            cursor: 0,
            stats: SelectionStats::default(),
        }
    }

    fn lookup(&self, borrower: Address, market: Address) -> Result<Address, SelectorError> {
        self.registry
            .underlying_of(market)
            .map_err(|_| SelectorError::UnknownMarket { borrower, market })
    }
}

/// First element with the greatest key. Later equal keys do not replace it.
fn first_max_by<'a, I, F>(iter: I, key: F) -> Option<&'a TokenBalance>
where
    I: Iterator<Item = &'a TokenBalance>,
    F: Fn(&TokenBalance) -> f64,
{
    iter.fold(None, |best: Option<&'a TokenBalance>, b| match best {
        Some(current) if key(b) <= key(current) => Some(current),
        _ => Some(b),
    })
}

/// Parameters for each eligible position, in snapshot order.
///
/// Ineligible positions are skipped and counted in [`stats`](Self::stats);
/// unknown markets are logged at error level and skipped.
pub struct ParameterSequence<'a, P> {
    selector: &'a ParameterSelector,
    positions: &'a [Position],
    picker: P,
    cursor: usize,
    stats: SelectionStats,
}

impl<'a, P: FlashLoanPicker> ParameterSequence<'a, P> {
    /// Counts for the positions consumed so far.
    pub fn stats(&self) -> &SelectionStats {
        &self.stats
    }

    /// Start over from the first position with a fresh picker.
    pub fn restart(&mut self, picker: P) {
        self.picker = picker;
        self.cursor = 0;
        self.stats = SelectionStats::default();
    }
}

impl<'a, P: FlashLoanPicker> Iterator for ParameterSequence<'a, P> {
    type Item = LiquidationParameters;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(position) = self.positions.get(self.cursor) {
            self.cursor += 1;
            match self.selector.select(position, &mut self.picker) {
                Ok(Selection::Liquidate(params)) => {
                    self.stats.selected += 1;
                    return Some(params);
                }
                Ok(Selection::NoEligibleCollateral) => {
                    self.stats.no_eligible_collateral += 1;
                    debug!(borrower = %position.borrower, "Skipped: no eligible collateral");
                }
                Ok(Selection::NoEligibleDebt) => {
                    self.stats.no_eligible_debt += 1;
                    debug!(borrower = %position.borrower, "Skipped: no eligible debt");
                }
                Ok(Selection::NoFlashLoanMarket) => {
                    self.stats.no_flash_loan_market += 1;
                    debug!(borrower = %position.borrower, "Skipped: no flash-loan market left");
                }
                Err(e) => {
                    self.stats.unknown_market += 1;
                    error!(borrower = %position.borrower, error = %e, "Skipped position");
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.positions.len() - self.cursor))
    }
}

impl<'a, P: FlashLoanPicker> FusedIterator for ParameterSequence<'a, P> {}
