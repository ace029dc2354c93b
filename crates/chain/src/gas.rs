//! Gas pricing for settlement transactions.
//!
//! Avalanche C-Chain accepts both legacy and EIP-1559 transactions, so the
//! model is chosen by configuration. Both variants cap what they will pay.

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;

const GWEI: f64 = 1e9;

/// C-Chain minimum base fee; used when the node reports no price.
pub const DEFAULT_GAS_PRICE_GWEI: f64 = 25.0;

/// Never pay more than this per gas unit.
pub const DEFAULT_MAX_GAS_PRICE_GWEI: f64 = 225.0;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    /// Single gas price in wei.
    Legacy { gas_price: u128 },
    /// Fee-market pricing in wei.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl GasParams {
    /// Worst-case price per gas unit, for logging and cost estimates.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }
}

/// How the sender prices its transactions.
#[derive(Debug, Clone, PartialEq)]
pub enum GasModel {
    /// `eth_gasPrice`, falling back to `default_gas_price`, capped at `max_gas_price`.
    Legacy {
        default_gas_price: u128,
        max_gas_price: u128,
    },
    /// `base_fee * max_fee_multiplier + tip`, capped at `max_fee_cap`.
    /// `default_base_fee` stands in when the latest header carries none.
    Eip1559 {
        default_base_fee: u128,
        default_priority_fee: u128,
        max_fee_multiplier: f64,
        max_fee_cap: u128,
    },
}

impl Default for GasModel {
    fn default() -> Self {
        GasModel::from_name("legacy", DEFAULT_GAS_PRICE_GWEI, DEFAULT_MAX_GAS_PRICE_GWEI)
    }
}

impl GasModel {
    /// Build a model from a configuration name ("legacy" or "eip1559").
    ///
    /// Unknown names fall back to legacy pricing.
    pub fn from_name(name: &str, default_gas_price_gwei: f64, max_gas_price_gwei: f64) -> Self {
        match name.to_lowercase().as_str() {
            "eip1559" | "eip-1559" => GasModel::Eip1559 {
                default_base_fee: (default_gas_price_gwei * GWEI) as u128,
                default_priority_fee: (2.0 * GWEI) as u128,
                max_fee_multiplier: 2.0,
                max_fee_cap: (max_gas_price_gwei * GWEI) as u128,
            },
            _ => GasModel::Legacy {
                default_gas_price: (default_gas_price_gwei * GWEI) as u128,
                max_gas_price: (max_gas_price_gwei * GWEI) as u128,
            },
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            GasModel::Legacy { .. } => "Legacy",
            GasModel::Eip1559 { .. } => "EIP-1559",
        }
    }

    /// Query the chain for current prices.
    pub async fn fetch_params<P: Provider>(&self, provider: &P) -> Result<GasParams> {
        match self {
            GasModel::Legacy {
                default_gas_price,
                max_gas_price,
            } => {
                let gas_price = provider
                    .get_gas_price()
                    .await
                    .unwrap_or(*default_gas_price);
                Ok(GasParams::Legacy {
                    gas_price: gas_price.min(*max_gas_price),
                })
            }
            GasModel::Eip1559 {
                default_priority_fee,
                ..
            } => {
                let block = provider
                    .get_block_by_number(BlockNumberOrTag::Latest)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("latest block unavailable"))?;
                let base_fee = self.base_fee_or_default(block.header.base_fee_per_gas);
                let priority_fee = provider
                    .get_max_priority_fee_per_gas()
                    .await
                    .unwrap_or(*default_priority_fee);
                Ok(self.eip1559_params(base_fee, priority_fee))
            }
        }
    }

    fn base_fee_or_default(&self, reported: Option<u64>) -> u128 {
        let fallback = match self {
            GasModel::Eip1559 { default_base_fee, .. } => *default_base_fee,
            GasModel::Legacy { default_gas_price, .. } => *default_gas_price,
        };
        reported.map(u128::from).unwrap_or(fallback)
    }

    fn eip1559_params(&self, base_fee: u128, priority_fee: u128) -> GasParams {
        let (multiplier, cap) = match self {
            GasModel::Eip1559 {
                max_fee_multiplier,
                max_fee_cap,
                ..
            } => (*max_fee_multiplier, *max_fee_cap),
            GasModel::Legacy { max_gas_price, .. } => (1.0, *max_gas_price),
        };
        let max_fee = ((base_fee as f64 * multiplier) as u128 + priority_fee).min(cap);
        GasParams::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority_fee.min(max_fee),
        }
    }

    /// Write the pricing fields onto a transaction request.
    pub fn apply(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Legacy { gas_price } => tx.set_gas_price(*gas_price),
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn test_from_name() {
        assert_eq!(GasModel::from_name("Legacy", 25.0, 225.0).name(), "Legacy");
        assert_eq!(GasModel::from_name("EIP1559", 25.0, 225.0).name(), "EIP-1559");
        // Unknown defaults to Legacy
        assert_eq!(GasModel::from_name("whatever", 25.0, 225.0).name(), "Legacy");
    }

    #[test]
    fn test_from_name_carries_configured_prices() {
        assert_eq!(
            GasModel::from_name("eip1559", 30.0, 300.0),
            GasModel::Eip1559 {
                default_base_fee: 30_000_000_000,
                default_priority_fee: 2_000_000_000,
                max_fee_multiplier: 2.0,
                max_fee_cap: 300_000_000_000,
            }
        );
        assert_eq!(
            GasModel::from_name("legacy", 30.0, 300.0),
            GasModel::Legacy {
                default_gas_price: 30_000_000_000,
                max_gas_price: 300_000_000_000,
            }
        );
        let model = GasModel::from_name("eip1559", 30.0, 300.0);
        assert_eq!(model.base_fee_or_default(None), 30_000_000_000);
        assert_eq!(model.base_fee_or_default(Some(27_000_000_000)), 27_000_000_000);

        assert_eq!(
            GasModel::default(),
            GasModel::Legacy {
                default_gas_price: 25_000_000_000,
                max_gas_price: 225_000_000_000,
            }
        );
    }

    #[test]
    fn test_eip1559_fee_is_capped() {
        let model = GasModel::Eip1559 {
            default_base_fee: 25_000_000_000,
            default_priority_fee: 2_000_000_000,
            max_fee_multiplier: 2.0,
            max_fee_cap: 100_000_000_000,
        };

        let params = model.eip1559_params(30_000_000_000, 2_000_000_000);
        assert_eq!(params.effective_gas_price(), 62_000_000_000);

        let params = model.eip1559_params(80_000_000_000, 2_000_000_000);
        assert_eq!(params.effective_gas_price(), 100_000_000_000);
    }

    #[test]
    fn test_apply_legacy() {
        let model = GasModel::default();
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);
        model.apply(&mut tx, &GasParams::Legacy { gas_price: 30_000_000_000 });
        assert_eq!(tx.gas_price(), Some(30_000_000_000));
    }

    #[test]
    fn test_apply_eip1559() {
        let model = GasModel::from_name("eip1559", 25.0, 225.0);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);
        model.apply(
            &mut tx,
            &GasParams::Eip1559 {
                max_fee_per_gas: 60_000_000_000,
                max_priority_fee_per_gas: 2_000_000_000,
            },
        );
        assert_eq!(TransactionBuilder::max_fee_per_gas(&tx), Some(60_000_000_000));
        assert_eq!(TransactionBuilder::max_priority_fee_per_gas(&tx), Some(2_000_000_000));
    }
}
