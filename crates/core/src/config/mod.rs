//! Configuration for the liquidation bot.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, snapshot window, timing)
//! - Market table configuration (jToken ↔ underlying)

mod bot;
mod markets;

pub use bot::{BotConfig, MonitorTimingConfig, SelectionConfig, SnapshotConfig};
pub use markets::{MarketConfig, MarketsConfig};
