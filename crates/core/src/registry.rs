//! Market registry: jToken market ↔ underlying ERC20.
//!
//! Built once from a [`MarketsConfig`] and shared read-only. Table order is
//! preserved because the flash-loan candidate list is derived from it.

use alloy::primitives::Address;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::MarketsConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown market {0}")]
    UnknownMarket(Address),

    #[error("market {0} listed twice")]
    DuplicateMarket(Address),

    #[error("underlying {underlying} mapped by both {first} and {second}")]
    DuplicateUnderlying {
        underlying: Address,
        first: Address,
        second: Address,
    },

    #[error("invalid market entry '{symbol}': {reason}")]
    InvalidEntry { symbol: String, reason: String },
}

/// One registered market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEntry {
    pub symbol: String,
    pub market: Address,
    pub underlying: Address,
}

/// Immutable bijection between markets and underlyings.
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    entries: Vec<MarketEntry>,
    by_market: HashMap<Address, usize>,
    by_underlying: HashMap<Address, usize>,
}

impl MarketRegistry {
    /// Build from entries in table order. Both directions must be unique.
    pub fn new(entries: impl IntoIterator<Item = MarketEntry>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for entry in entries {
            if registry.by_market.contains_key(&entry.market) {
                return Err(RegistryError::DuplicateMarket(entry.market));
            }
            if let Some(&idx) = registry.by_underlying.get(&entry.underlying) {
                return Err(RegistryError::DuplicateUnderlying {
                    underlying: entry.underlying,
                    first: registry.entries[idx].market,
                    second: entry.market,
                });
            }
            let idx = registry.entries.len();
            registry.by_market.insert(entry.market, idx);
            registry.by_underlying.insert(entry.underlying, idx);
            registry.entries.push(entry);
        }
        Ok(registry)
    }

    pub fn from_config(config: &MarketsConfig) -> Result<Self, RegistryError> {
        let entries = config
            .markets
            .iter()
            .map(|m| {
                let invalid = |e: anyhow::Error| RegistryError::InvalidEntry {
                    symbol: m.symbol.clone(),
                    reason: e.to_string(),
                };
                Ok(MarketEntry {
                    symbol: m.symbol.clone(),
                    market: m.market_address().map_err(invalid)?,
                    underlying: m.underlying_address().map_err(invalid)?,
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;
        Self::new(entries)
    }

    /// Underlying of a registered market.
    pub fn underlying_of(&self, market: Address) -> Result<Address, RegistryError> {
        self.by_market
            .get(&market)
            .map(|&idx| self.entries[idx].underlying)
            .ok_or(RegistryError::UnknownMarket(market))
    }

    /// Market that wraps `underlying`, if registered.
    pub fn market_of(&self, underlying: Address) -> Option<Address> {
        self.by_underlying
            .get(&underlying)
            .map(|&idx| self.entries[idx].market)
    }

    pub fn symbol_of(&self, market: Address) -> Option<&str> {
        self.by_market
            .get(&market)
            .map(|&idx| self.entries[idx].symbol.as_str())
    }

    pub fn contains(&self, market: Address) -> bool {
        self.by_market.contains_key(&market)
    }

    /// Every registered market, in table order.
    pub fn all_markets(&self) -> impl Iterator<Item = Address> + '_ {
        self.entries.iter().map(|e| e.market)
    }

    pub fn entries(&self) -> &[MarketEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn entry(symbol: &str, market: Address, underlying: Address) -> MarketEntry {
        MarketEntry {
            symbol: symbol.to_string(),
            market,
            underlying,
        }
    }

    #[test]
    fn test_banker_joe_lookup() {
        let registry = MarketRegistry::from_config(&MarketsConfig::banker_joe().unwrap()).unwrap();
        let jusdc = address!("Ed6AaF91a2B084bd594DBd1245be3691F9f637aC");
        let usdc = address!("A7D7079b0FEaD91F3e65f86E8915Cb59c1a4C664");

        assert_eq!(registry.len(), 9);
        assert_eq!(registry.underlying_of(jusdc).unwrap(), usdc);
        assert_eq!(registry.market_of(usdc), Some(jusdc));
        assert_eq!(registry.symbol_of(jusdc), Some("jUSDC"));
    }

    #[test]
    fn test_unknown_market() {
        let registry = MarketRegistry::default();
        let market = Address::repeat_byte(0x42);
        assert_eq!(
            registry.underlying_of(market),
            Err(RegistryError::UnknownMarket(market))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_order_preserved() {
        let registry = MarketRegistry::new((1..=4u8).rev().map(|i| {
            entry("j", Address::repeat_byte(i), Address::repeat_byte(0xF0 | i))
        }))
        .unwrap();

        let listed: Vec<Address> = registry.all_markets().collect();
        let expected: Vec<Address> = (1..=4u8).rev().map(Address::repeat_byte).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_duplicates_rejected() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let u = Address::repeat_byte(9);

        let err = MarketRegistry::new([entry("jA", a, u), entry("jA2", a, b)]).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateMarket(a));

        let err = MarketRegistry::new([entry("jA", a, u), entry("jB", b, u)]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateUnderlying { .. }));
    }

    #[test]
    fn test_invalid_entry_names_symbol() {
        let config = MarketsConfig::from_toml_str(
            r#"
            [[markets]]
            symbol = "jBROKEN"
            market = "not-an-address"
            underlying = "0x2222222222222222222222222222222222222222"
            "#,
        )
        .unwrap();

        match MarketRegistry::from_config(&config) {
            Err(RegistryError::InvalidEntry { symbol, .. }) => assert_eq!(symbol, "jBROKEN"),
            other => panic!("expected InvalidEntry, got {other:?}"),
        }
    }
}
