//! Market table loading from TOML files.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Banker Joe markets on Avalanche C-Chain, embedded as the default table.
const BANKER_JOE_MARKETS: &str = include_str!("../../../../config/markets/banker-joe.toml");

/// Market table file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsConfig {
    /// Markets in table order
    pub markets: Vec<MarketConfig>,
}

/// One lending market (TOML-loadable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Market symbol (e.g., "jUSDC")
    pub symbol: String,
    /// jToken contract address (as hex string)
    pub market: String,
    /// Underlying ERC20 address (as hex string)
    pub underlying: String,
}

impl MarketConfig {
    /// Parse market address.
    pub fn market_address(&self) -> anyhow::Result<Address> {
        self.market
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid market address '{}': {}", self.market, e))
    }

    /// Parse underlying address.
    pub fn underlying_address(&self) -> anyhow::Result<Address> {
        self.underlying.parse().map_err(|e| {
            anyhow::anyhow!("Invalid underlying address '{}': {}", self.underlying, e)
        })
    }
}

impl MarketsConfig {
    /// Load a market table from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: MarketsConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// The embedded Banker Joe table.
    pub fn banker_joe() -> anyhow::Result<Self> {
        Self::from_toml_str(BANKER_JOE_MARKETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markets_config() {
        let toml_str = r#"
            [[markets]]
            symbol = "jTEST"
            market = "0x1111111111111111111111111111111111111111"
            underlying = "0x2222222222222222222222222222222222222222"
        "#;

        let config = MarketsConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.markets.len(), 1);
        assert_eq!(config.markets[0].symbol, "jTEST");
        assert!(config.markets[0].market_address().is_ok());
        assert!(config.markets[0].underlying_address().is_ok());
    }

    #[test]
    fn test_bad_address_reported() {
        let config = MarketConfig {
            symbol: "jBAD".to_string(),
            market: "0x1234".to_string(),
            underlying: "0x2222222222222222222222222222222222222222".to_string(),
        };
        let err = config.market_address().unwrap_err();
        assert!(err.to_string().contains("0x1234"));
    }

    #[test]
    fn test_embedded_table() {
        let config = MarketsConfig::banker_joe().unwrap();
        assert_eq!(config.markets.len(), 9);
        assert_eq!(config.markets[0].symbol, "jAVAX");

        let usdc = config.markets.iter().find(|m| m.symbol == "jUSDC").unwrap();
        assert_eq!(
            usdc.market_address().unwrap(),
            "0xEd6AaF91a2B084bd594DBd1245be3691F9f637aC".parse::<Address>().unwrap()
        );
        assert_eq!(
            usdc.underlying_address().unwrap(),
            "0xA7D7079b0FEaD91F3e65f86E8915Cb59c1a4C664".parse::<Address>().unwrap()
        );
        for market in &config.markets {
            assert!(market.market_address().is_ok(), "{}", market.symbol);
            assert!(market.underlying_address().is_ok(), "{}", market.symbol);
        }
    }
}
