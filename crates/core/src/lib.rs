//! Banker Joe liquidator core logic.
//!
//! This crate provides the liquidation bot functionality:
//! - Market registry (jToken ↔ underlying) loaded from configuration
//! - Per-position parameter selection (seize, repay, flash-loan markets)
//! - Dispatch of `liquidateLoan` with outcome classification
//! - The block-driven monitor loop with in-flight tracking and backoff

pub mod config;
mod dispatcher;
mod in_flight;
mod monitor;
mod position;
mod registry;
mod selector;
mod source;

pub use config::{BotConfig, MarketConfig, MarketsConfig};
pub use dispatcher::{DispatchOutcome, LiquidationDispatcher, Settlement};
pub use in_flight::{InFlightBorrowers, InFlightGuard};
pub use monitor::{ChainHeadSignal, CycleReport, MonitorConfig, MonitorLoop, MonitorState};
pub use position::{Position, PositionError, TokenBalance};
pub use registry::{MarketEntry, MarketRegistry, RegistryError};
pub use selector::{
    FlashLoanPicker, LiquidationParameters, ParameterSelector, ParameterSequence, SeededPicker,
    Selection, SelectionStats, SelectorError,
};
pub use source::{positions_from_accounts, PositionSource, PriceSource, SnapshotQuery, SourceError};
