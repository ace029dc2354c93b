//! Transaction signer and sender for settlement calls.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! - Cached nonce: atomic counter, resynced from chain after any failure
//! - Pre-flight `eth_call` so reverts surface with a reason before gas is spent
//! - Legacy or EIP-1559 pricing via [`GasModel`]

use crate::gas::{GasModel, GasParams};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportErrorKind};
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Gas limit for a flash-loan liquidation (borrow, repay, seize, redeem, swap, repay loan).
const DEFAULT_LIQUIDATION_GAS_LIMIT: u64 = 2_000_000;

/// Bound on each RPC round trip (simulation, gas query, broadcast, nonce).
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for a broadcast transaction to be mined.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a submission did not produce a successful receipt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The call reverted, either in pre-flight or once mined.
    #[error("transaction reverted: {reason}")]
    Reverted {
        /// Hash of the mined transaction; `None` when the pre-flight call reverted
        tx_hash: Option<B256>,
        reason: String,
    },

    /// RPC or network failure; the outcome on chain is unknown or absent.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Receipt of a confirmed, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Local nonce counter so submissions do not need a round trip each.
#[derive(Debug)]
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Take the next nonce.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Overwrite with the chain's pending count (after a failed send).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Builder for TransactionSender.
pub struct TransactionSenderBuilder {
    rpc_url: String,
    chain_id: u64,
    gas_model: GasModel,
    gas_limit: u64,
    rpc_timeout: Duration,
    receipt_timeout: Duration,
}

impl TransactionSenderBuilder {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            gas_model: GasModel::default(),
            gas_limit: DEFAULT_LIQUIDATION_GAS_LIMIT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }

    pub fn gas_model(mut self, model: GasModel) -> Self {
        self.gas_model = model;
        self
    }

    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = limit;
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Parse the key, fetch the starting nonce and build the sender.
    pub async fn build(self, private_key: &str) -> anyhow::Result<TransactionSender> {
        let signer: PrivateKeySigner = private_key.trim_start_matches("0x").parse()?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let rpc_url: Url = self.rpc_url.parse()?;

        let provider = ProviderBuilder::new().on_http(rpc_url.clone());
        let initial_nonce =
            within(self.rpc_timeout, "nonce query", provider.get_transaction_count(address)).await??;

        info!(
            address = %address,
            chain_id = self.chain_id,
            initial_nonce = initial_nonce,
            gas_model = self.gas_model.name(),
            rpc_timeout_ms = self.rpc_timeout.as_millis(),
            receipt_timeout_ms = self.receipt_timeout.as_millis(),
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            rpc_url,
            wallet,
            address,
            chain_id: self.chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            gas_limit: self.gas_limit,
            gas_model: self.gas_model,
            rpc_timeout: self.rpc_timeout,
            receipt_timeout: self.receipt_timeout,
        })
    }
}

/// Signs and submits transactions from the operator account.
pub struct TransactionSender {
    rpc_url: Url,
    wallet: EthereumWallet,
    /// Operator address
    pub address: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    gas_limit: u64,
    gas_model: GasModel,
    rpc_timeout: Duration,
    receipt_timeout: Duration,
}

impl TransactionSender {
    /// Create a sender with legacy gas pricing.
    pub async fn new(private_key: &str, rpc_url: &str, chain_id: u64) -> anyhow::Result<Self> {
        TransactionSenderBuilder::new(rpc_url, chain_id)
            .build(private_key)
            .await
    }

    pub fn gas_model(&self) -> &GasModel {
        &self.gas_model
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    /// Send `calldata` to `to` and wait for the receipt.
    ///
    /// The call is simulated first; a simulated revert is reported without
    /// broadcasting. A receipt with failed status is also a revert. Every
    /// RPC step is time-bounded; running out of time is a transport failure.
    pub async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<TxReceipt, SendError> {
        let start = Instant::now();
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(calldata)
            .with_gas_limit(self.gas_limit)
            .with_chain_id(self.chain_id);

        // Pre-flight: surface the revert reason without paying for it
        if let Err(e) = within(self.rpc_timeout, "pre-flight call", provider.call(tx.clone())).await? {
            return Err(classify_rpc_error(e));
        }

        let gas_params: GasParams =
            within(self.rpc_timeout, "gas price query", self.gas_model.fetch_params(&provider))
                .await?
                .map_err(|e| SendError::Transport(e.to_string()))?;
        self.gas_model.apply(&mut tx, &gas_params);

        let nonce = self.nonce_manager.next();
        tx.set_nonce(nonce);

        debug!(
            to = %to,
            nonce = nonce,
            gas_limit = self.gas_limit,
            gas_model = self.gas_model.name(),
            gas_price_gwei = gas_params.effective_gas_price() / 1_000_000_000,
            "Sending transaction"
        );

        let pending = match within(self.rpc_timeout, "broadcast", provider.send_transaction(tx)).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                self.sync_nonce().await;
                return Err(classify_rpc_error(e));
            }
            Err(timed_out) => {
                self.sync_nonce().await;
                return Err(timed_out);
            }
        };
        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, "Transaction submitted, waiting for confirmation");

        let receipt = match pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "Lost track of submitted transaction");
                self.sync_nonce().await;
                return Err(SendError::Transport(e.to_string()));
            }
        };

        if receipt.status() {
            info!(
                tx_hash = %tx_hash,
                block = receipt.block_number.unwrap_or(0),
                gas_used = receipt.gas_used,
                total_ms = start.elapsed().as_millis(),
                "Transaction confirmed"
            );
            Ok(TxReceipt {
                tx_hash,
                block_number: receipt.block_number,
                gas_used: receipt.gas_used,
            })
        } else {
            self.sync_nonce().await;
            Err(reverted_on_chain(tx_hash))
        }
    }

    /// Reload the nonce from the chain.
    pub async fn sync_nonce(&self) {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let fetched = within(
            self.rpc_timeout,
            "nonce query",
            provider.get_transaction_count(self.address),
        )
        .await;
        match fetched.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string())) {
            Ok(chain_nonce) => {
                self.nonce_manager.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("gas_model", &self.gas_model.name())
            .finish_non_exhaustive()
    }
}

/// Run `fut`, failing with [`SendError::Transport`] once `limit` elapses.
async fn within<F: IntoFuture>(limit: Duration, what: &str, fut: F) -> Result<F::Output, SendError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        SendError::Transport(format!("{what} timed out after {}ms", limit.as_millis()))
    })
}

/// A mined transaction with failed status. Routine when another liquidator
/// got there first; the dispatcher reports it.
fn reverted_on_chain(tx_hash: B256) -> SendError {
    debug!(tx_hash = %tx_hash, "Transaction reverted on chain");
    SendError::Reverted {
        tx_hash: Some(tx_hash),
        reason: "reverted on chain".to_string(),
    }
}

/// Split RPC failures into reverts (node answered, execution failed) and
/// transport problems.
fn classify_rpc_error(err: RpcError<TransportErrorKind>) -> SendError {
    match err.as_error_resp() {
        Some(payload) => {
            let reason = payload
                .as_revert_data()
                .and_then(|data| alloy::sol_types::decode_revert_reason(&data));
            if reason.is_some() || is_revert_message(&payload.message) {
                SendError::Reverted {
                    tx_hash: None,
                    reason: reason.unwrap_or_else(|| payload.message.to_string()),
                }
            } else {
                SendError::Transport(payload.message.to_string())
            }
        }
        None => SendError::Transport(err.to_string()),
    }
}

fn is_revert_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("revert") || message.contains("execution failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_manager() {
        let manager = NonceManager::new(10);

        assert_eq!(manager.current(), 10);
        assert_eq!(manager.next(), 10);
        assert_eq!(manager.next(), 11);
        assert_eq!(manager.current(), 12);

        // Reset forces update, even backwards
        manager.reset(5);
        assert_eq!(manager.current(), 5);
    }

    #[test]
    fn test_revert_message_detection() {
        assert!(is_revert_message("execution reverted: Liquidator: not profitable"));
        assert!(is_revert_message("VM Exception while processing transaction: revert"));
        assert!(!is_revert_message("nonce too low"));
        assert!(!is_revert_message("insufficient funds for gas * price + value"));
    }

    #[test]
    fn test_send_error_display() {
        let err = SendError::Reverted {
            tx_hash: None,
            reason: "comptroller rejection".to_string(),
        };
        assert_eq!(err.to_string(), "transaction reverted: comptroller rejection");

        let err = SendError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "transport failure: connection refused");
    }

    /// Accepts connections and never answers.
    async fn silent_rpc() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_unresponsive_rpc_fails_build() {
        let url = silent_rpc().await;
        let dev_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            TransactionSenderBuilder::new(url, 43114)
                .rpc_timeout(Duration::from_millis(200))
                .build(dev_key),
        )
        .await
        .expect("build should give up on its own");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_within_maps_elapsed_to_transport() {
        let result = within(
            Duration::from_millis(10),
            "receipt",
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(
            result,
            Err(SendError::Transport("receipt timed out after 10ms".to_string()))
        );

        assert_eq!(within(Duration::from_secs(1), "call", async { 7 }).await, Ok(7));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_mined_revert_stays_below_info() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        let err = tracing::subscriber::with_default(subscriber, || {
            reverted_on_chain(B256::repeat_byte(0xAB))
        });

        assert!(matches!(err, SendError::Reverted { tx_hash: Some(_), .. }));
        assert!(logs.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_sender_creation() {
        // Well-known dev key (DO NOT USE IN PRODUCTION)
        let private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let sender = TransactionSender::new(private_key, "https://api.avax.network/ext/bc/C/rpc", 43114)
            .await
            .unwrap();

        assert_eq!(
            format!("{:?}", sender.address).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(sender.gas_model().name(), "Legacy");
    }
}
