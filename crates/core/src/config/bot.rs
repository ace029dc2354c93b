//! Bot runtime configuration with profile support.
//!
//! Profiles (default, production, aggressive) cover the snapshot window,
//! loop timing and flash-loan selection seed. A full TOML file can be
//! supplied instead through `BOT_CONFIG`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::MarketsConfig;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Which accounts the snapshot query returns
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Monitor loop timing
    #[serde(default)]
    pub monitor: MonitorTimingConfig,

    /// Flash-loan market selection
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Market table path; the embedded Banker Joe table when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markets_file: Option<String>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Health window of the underwater-account query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Accounts with health strictly above this are returned
    #[serde(default = "default_health_lower")]
    pub health_lower_bound: f64,

    /// Accounts with health strictly below this are returned
    #[serde(default = "default_health_upper")]
    pub health_upper_bound: f64,

    /// Minimum total borrow value (USD)
    #[serde(default)]
    pub min_borrow_value_usd: f64,
}

fn default_health_lower() -> f64 {
    0.0
}
fn default_health_upper() -> f64 {
    1.0
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            health_lower_bound: default_health_lower(),
            health_upper_bound: default_health_upper(),
            min_borrow_value_usd: 0.0,
        }
    }
}

/// Monitor loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorTimingConfig {
    /// Chain-head poll interval (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// First wait after a failed snapshot (milliseconds)
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Longest wait between snapshot retries (milliseconds)
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Bound on each subgraph request and RPC round trip (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Bound on waiting for a liquidation to be mined (milliseconds)
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_ms: u64,

    /// Query and log underlying prices each cycle
    #[serde(default)]
    pub log_prices: bool,
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_backoff_initial() -> u64 {
    2000
}
fn default_backoff_max() -> u64 {
    60_000
}
fn default_request_timeout() -> u64 {
    10_000
}
fn default_receipt_timeout() -> u64 {
    60_000
}

impl Default for MonitorTimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            request_timeout_ms: default_request_timeout(),
            receipt_timeout_ms: default_receipt_timeout(),
            log_prices: false,
        }
    }
}

impl MonitorTimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }
}

/// Flash-loan market selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Seed for the random pick; seeded from OS entropy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            snapshot: SnapshotConfig::default(),
            monitor: MonitorTimingConfig::default(),
            selection: SelectionConfig::default(),
            markets_file: None,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Conservative profile: ignores dust debt and polls at block cadence.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            snapshot: SnapshotConfig {
                min_borrow_value_usd: 100.0, // skip dust borrowers
                ..Default::default()
            },
            monitor: MonitorTimingConfig {
                poll_interval_ms: 2000,
                backoff_initial_ms: 5000,
                backoff_max_ms: 120_000,
                request_timeout_ms: 15_000,
                receipt_timeout_ms: 90_000,
                log_prices: false,
            },
            selection: SelectionConfig::default(),
            markets_file: None,
        }
    }

    /// Aggressive profile: fast polling, short backoff, every borrower.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            snapshot: SnapshotConfig::default(),
            monitor: MonitorTimingConfig {
                poll_interval_ms: 250,
                backoff_initial_ms: 500,
                backoff_max_ms: 10_000,
                request_timeout_ms: 5_000,
                receipt_timeout_ms: 30_000,
                log_prices: false,
            },
            selection: SelectionConfig::default(),
            markets_file: None,
        }
    }

    /// Load `BOT_CONFIG` if set, otherwise the `BOT_PROFILE` profile.
    /// Supported profiles: default, production, aggressive
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("BOT_CONFIG") {
            return Self::from_file(&path);
        }
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Ok(Self::from_profile(&profile))
    }

    /// Named profile; unknown names give the default profile.
    pub fn from_profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Reject windows and timings the monitor cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.snapshot;
        if !(s.health_lower_bound < s.health_upper_bound) {
            anyhow::bail!(
                "snapshot health window is empty: ({}, {})",
                s.health_lower_bound,
                s.health_upper_bound
            );
        }
        if !s.min_borrow_value_usd.is_finite() || s.min_borrow_value_usd < 0.0 {
            anyhow::bail!("min_borrow_value_usd must be >= 0, got {}", s.min_borrow_value_usd);
        }
        if self.monitor.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be > 0");
        }
        if self.monitor.request_timeout_ms == 0 || self.monitor.receipt_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms and receipt_timeout_ms must be > 0");
        }
        if self.monitor.backoff_initial_ms > self.monitor.backoff_max_ms {
            anyhow::bail!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                self.monitor.backoff_initial_ms,
                self.monitor.backoff_max_ms
            );
        }
        Ok(())
    }

    /// Market table from `markets_file`, or the embedded default.
    pub fn markets(&self) -> anyhow::Result<MarketsConfig> {
        match &self.markets_file {
            Some(path) => MarketsConfig::from_file(path),
            None => MarketsConfig::banker_joe(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            health_gt = self.snapshot.health_lower_bound,
            health_lt = self.snapshot.health_upper_bound,
            min_borrow_usd = self.snapshot.min_borrow_value_usd,
            "Snapshot window"
        );
        tracing::info!(
            poll_ms = self.monitor.poll_interval_ms,
            backoff_initial_ms = self.monitor.backoff_initial_ms,
            backoff_max_ms = self.monitor.backoff_max_ms,
            request_timeout_ms = self.monitor.request_timeout_ms,
            receipt_timeout_ms = self.monitor.receipt_timeout_ms,
            log_prices = self.monitor.log_prices,
            "Monitor timing"
        );
        tracing::info!(
            seed = ?self.selection.seed,
            markets_file = self.markets_file.as_deref().unwrap_or("<embedded>"),
            "Selection"
        );
    }
}
