//! Banker Joe chain interaction layer.
//!
//! This crate provides:
//! - The flash-loan liquidator contract binding and calldata encoding
//! - Transaction signing and sending with a cached nonce
//! - Gas pricing (Legacy + EIP-1559)
//! - Chain-head polling

mod blocks;
mod contracts;
pub mod gas;
mod signer;

pub use blocks::{BlockWatcher, DEFAULT_HEAD_TIMEOUT};
pub use contracts::{ILiquidator, LiquidateLoanArgs, LiquidatorContract};
pub use gas::{GasModel, GasParams};
pub use signer::{
    NonceManager, SendError, TransactionSender, TransactionSenderBuilder, TxReceipt,
    DEFAULT_RECEIPT_TIMEOUT, DEFAULT_RPC_TIMEOUT,
};
