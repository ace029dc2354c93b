//! Settlement contract binding.
//!
//! The deployed `Liquidator` contract takes a flash loan in one market,
//! repays the borrower's debt in another, seizes and redeems collateral,
//! swaps back and repays the loan, all in one transaction.

use alloy::primitives::{Address, Bytes};
use alloy::sol;
use alloy::sol_types::SolCall;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::signer::{SendError, TransactionSender, TxReceipt};

sol! {
    /// Flash-loan liquidator interface (subset used by the bot).
    #[derive(Debug)]
    interface ILiquidator {
        function liquidateLoan(
            address borrower,
            address repayMarket,
            address repayUnderlying,
            address seizeMarket,
            address seizeUnderlying,
            address flashLoanMarket,
            address flashLoanUnderlying
        ) external;

        function owner() external view returns (address);
    }
}

/// Arguments of `liquidateLoan`, market (jToken) and underlying per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidateLoanArgs {
    pub borrower: Address,
    pub repay_market: Address,
    pub repay_underlying: Address,
    pub seize_market: Address,
    pub seize_underlying: Address,
    pub flash_loan_market: Address,
    pub flash_loan_underlying: Address,
}

impl LiquidateLoanArgs {
    /// ABI-encode the `liquidateLoan` call.
    pub fn encode(&self) -> Bytes {
        ILiquidator::liquidateLoanCall {
            borrower: self.borrower,
            repayMarket: self.repay_market,
            repayUnderlying: self.repay_underlying,
            seizeMarket: self.seize_market,
            seizeUnderlying: self.seize_underlying,
            flashLoanMarket: self.flash_loan_market,
            flashLoanUnderlying: self.flash_loan_underlying,
        }
        .abi_encode()
        .into()
    }
}

/// Deployed liquidator contract with the sender that calls it.
#[derive(Debug, Clone)]
pub struct LiquidatorContract {
    /// Contract address
    pub address: Address,
    sender: Arc<TransactionSender>,
}

impl LiquidatorContract {
    pub fn with_sender(address: Address, sender: Arc<TransactionSender>) -> Self {
        Self { address, sender }
    }

    /// Submit `liquidateLoan` from the operator account and wait for the outcome.
    #[instrument(skip(self, args), fields(borrower = %args.borrower))]
    pub async fn liquidate_loan(&self, args: &LiquidateLoanArgs) -> Result<TxReceipt, SendError> {
        info!(
            contract = %self.address,
            repay_market = %args.repay_market,
            seize_market = %args.seize_market,
            flash_loan_market = %args.flash_loan_market,
            "Submitting liquidateLoan"
        );
        self.sender.send_transaction(self.address, args.encode()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};

    fn sample_args() -> LiquidateLoanArgs {
        LiquidateLoanArgs {
            borrower: address!("d9233c98d84e50f07b122ee0de0a6a50f49127e0"),
            repay_market: address!("585E7bC75089eD111b656faA7aeb1104F5b96c15"),
            repay_underlying: address!("5947bb275c521040051d82396192181b413227a3"),
            seize_market: address!("8b650e26404AC6837539ca96812f0123601E4448"),
            seize_underlying: address!("c7198437980c041c805a1edcba50c1ce5db95118"),
            flash_loan_market: address!("Ed6AaF91a2B084bd594DBd1245be3691F9f637aC"),
            flash_loan_underlying: address!("A7D7079b0FEaD91F3e65f86E8915Cb59c1a4C664"),
        }
    }

    #[test]
    fn test_selector_matches_signature() {
        let expected = keccak256(
            "liquidateLoan(address,address,address,address,address,address,address)",
        );
        assert_eq!(
            hex::encode(ILiquidator::liquidateLoanCall::SELECTOR),
            hex::encode(&expected[..4]),
            "liquidateLoan selector mismatch! Bot will send incorrect calldata."
        );
    }

    #[test]
    fn test_encode_argument_order() {
        let args = sample_args();
        let encoded = args.encode();

        // selector + 7 static words
        assert_eq!(encoded.len(), 4 + 7 * 32);

        let word = |i: usize| &encoded[4 + i * 32 + 12..4 + (i + 1) * 32];
        assert_eq!(word(0), args.borrower.as_slice());
        assert_eq!(word(1), args.repay_market.as_slice());
        assert_eq!(word(2), args.repay_underlying.as_slice());
        assert_eq!(word(3), args.seize_market.as_slice());
        assert_eq!(word(4), args.seize_underlying.as_slice());
        assert_eq!(word(5), args.flash_loan_market.as_slice());
        assert_eq!(word(6), args.flash_loan_underlying.as_slice());
    }
}
