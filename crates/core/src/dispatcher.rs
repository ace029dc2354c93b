//! Liquidation dispatch: one settlement call per parameter set.
//!
//! Every call is independent and never retried. Reverts are routine
//! (another liquidator got there first) and only logged at info.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use banker_chain::{LiquidateLoanArgs, LiquidatorContract, SendError, TxReceipt};

use crate::selector::LiquidationParameters;

/// Something that can submit `liquidateLoan` and report its outcome.
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn liquidate_loan(&self, params: &LiquidationParameters) -> Result<TxReceipt, SendError>;
}

#[async_trait]
impl Settlement for LiquidatorContract {
    async fn liquidate_loan(&self, params: &LiquidationParameters) -> Result<TxReceipt, SendError> {
        LiquidatorContract::liquidate_loan(self, &LiquidateLoanArgs::from(*params)).await
    }
}

#[async_trait]
impl<S: Settlement + ?Sized> Settlement for Arc<S> {
    async fn liquidate_loan(&self, params: &LiquidationParameters) -> Result<TxReceipt, SendError> {
        (**self).liquidate_loan(params).await
    }
}

/// How one dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success(TxReceipt),
    /// Execution reverted, in simulation or on chain
    Reverted(String),
    /// RPC or network failure
    TransportFailure(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Success(_) => "success",
            DispatchOutcome::Reverted(_) => "reverted",
            DispatchOutcome::TransportFailure(_) => "transport_failure",
        }
    }
}

impl From<Result<TxReceipt, SendError>> for DispatchOutcome {
    fn from(result: Result<TxReceipt, SendError>) -> Self {
        match result {
            Ok(receipt) => DispatchOutcome::Success(receipt),
            Err(SendError::Reverted { reason, .. }) => DispatchOutcome::Reverted(reason),
            Err(SendError::Transport(e)) => DispatchOutcome::TransportFailure(e),
        }
    }
}

/// Submits parameter sets through a [`Settlement`].
#[derive(Debug, Clone)]
pub struct LiquidationDispatcher<S> {
    settlement: S,
}

impl<S: Settlement> LiquidationDispatcher<S> {
    pub fn new(settlement: S) -> Self {
        Self { settlement }
    }

    pub fn settlement(&self) -> &S {
        &self.settlement
    }

    /// Submit one liquidation and classify the result.
    #[instrument(skip(self, params), fields(borrower = %params.borrower))]
    pub async fn dispatch(&self, params: &LiquidationParameters) -> DispatchOutcome {
        let start = Instant::now();
        let outcome = DispatchOutcome::from(self.settlement.liquidate_loan(params).await);
        let elapsed_ms = start.elapsed().as_millis();

        match &outcome {
            DispatchOutcome::Success(receipt) => info!(
                borrower = %params.borrower,
                tx_hash = %receipt.tx_hash,
                block = receipt.block_number.unwrap_or(0),
                gas_used = receipt.gas_used,
                elapsed_ms = elapsed_ms,
                "Liquidation succeeded"
            ),
            DispatchOutcome::Reverted(reason) => info!(
                borrower = %params.borrower,
                reason = %reason,
                elapsed_ms = elapsed_ms,
                "Liquidation reverted"
            ),
            DispatchOutcome::TransportFailure(error) => warn!(
                borrower = %params.borrower,
                error = %error,
                elapsed_ms = elapsed_ms,
                "Liquidation submission failed"
            ),
        }
        outcome
    }
}
