//! Monitor loop: wait for a new chain head, snapshot underwater positions,
//! select parameters and dispatch them one by one.
//!
//! Cancellation is only observed while idle, so a submission that has
//! started always runs to its outcome.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use banker_chain::BlockWatcher;

use crate::config::BotConfig;
use crate::dispatcher::{DispatchOutcome, LiquidationDispatcher, Settlement};
use crate::in_flight::InFlightBorrowers;
use crate::position::Position;
use crate::selector::{ParameterSelector, SeededPicker, SelectionStats};
use crate::source::{PositionSource, PriceSource, SnapshotQuery, SourceError};

/// Reports how many new chain heads appeared since the last call.
#[async_trait]
pub trait ChainHeadSignal: Send {
    async fn next_heads(&mut self) -> anyhow::Result<u64>;
}

#[async_trait]
impl ChainHeadSignal for BlockWatcher {
    async fn next_heads(&mut self) -> anyhow::Result<u64> {
        self.wait_for_new_blocks().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for a new chain head
    Idle,
    /// Snapshot fetched, dispatching
    Processing,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub query: SnapshotQuery,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub log_prices: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&BotConfig::default())
    }
}

impl From<&BotConfig> for MonitorConfig {
    fn from(config: &BotConfig) -> Self {
        Self {
            query: SnapshotQuery::from(&config.snapshot),
            backoff_initial: config.monitor.backoff_initial(),
            backoff_max: config.monitor.backoff_max(),
            log_prices: config.monitor.log_prices,
        }
    }
}

/// Counters for one processing cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub new_heads: u64,
    /// Positions in the snapshot
    pub positions: usize,
    pub in_flight_skipped: usize,
    pub selection: SelectionStats,
    pub succeeded: usize,
    pub reverted: usize,
    pub transport_failures: usize,
}

impl CycleReport {
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.reverted + self.transport_failures
    }

    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Success(_) => self.succeeded += 1,
            DispatchOutcome::Reverted(_) => self.reverted += 1,
            DispatchOutcome::TransportFailure(_) => self.transport_failures += 1,
        }
    }

    fn log(&self) {
        info!(
            new_heads = self.new_heads,
            positions = self.positions,
            in_flight_skipped = self.in_flight_skipped,
            selected = self.selection.selected,
            no_eligible_collateral = self.selection.no_eligible_collateral,
            no_eligible_debt = self.selection.no_eligible_debt,
            no_flash_loan_market = self.selection.no_flash_loan_market,
            unknown_market = self.selection.unknown_market,
            succeeded = self.succeeded,
            reverted = self.reverted,
            transport_failures = self.transport_failures,
            "Cycle complete"
        );
    }
}

/// Single-worker liquidation loop.
pub struct MonitorLoop<S, D, H> {
    source: S,
    dispatcher: LiquidationDispatcher<D>,
    heads: H,
    selector: ParameterSelector,
    picker: SeededPicker,
    in_flight: Arc<InFlightBorrowers>,
    prices: Option<Arc<dyn PriceSource>>,
    config: MonitorConfig,
    backoff: ExponentialBackoff,
    retry_at: Option<Instant>,
    state: MonitorState,
    cycles: u64,
}

impl<S, D, H> MonitorLoop<S, D, H>
where
    S: PositionSource,
    D: Settlement,
    H: ChainHeadSignal,
{
    pub fn new(
        source: S,
        dispatcher: LiquidationDispatcher<D>,
        heads: H,
        selector: ParameterSelector,
        picker: SeededPicker,
        config: MonitorConfig,
    ) -> Self {
        let backoff = ExponentialBackoff {
            current_interval: config.backoff_initial,
            initial_interval: config.backoff_initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: config.backoff_max,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        Self {
            source,
            dispatcher,
            heads,
            selector,
            picker,
            in_flight: InFlightBorrowers::new(),
            prices: None,
            config,
            backoff,
            retry_at: None,
            state: MonitorState::Idle,
            cycles: 0,
        }
    }

    /// Share the in-flight set with other dispatchers.
    pub fn with_in_flight(mut self, in_flight: Arc<InFlightBorrowers>) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// Price source queried each cycle when `log_prices` is set.
    pub fn with_price_source(mut self, prices: Arc<dyn PriceSource>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn in_flight(&self) -> &Arc<InFlightBorrowers> {
        &self.in_flight
    }

    /// Cycles that fetched a snapshot (failed ones included).
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run until `cancel` fires. Cancellation is checked only while idle.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(markets = self.selector.registry().len(), "Monitor loop started");

        loop {
            self.state = MonitorState::Idle;
            if cancel.is_cancelled() {
                break;
            }

            let heads = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                heads = self.heads.next_heads() => heads,
            };

            match heads {
                Ok(0) => continue,
                Ok(new_heads) => {
                    self.on_new_heads(new_heads).await;
                }
                Err(e) => warn!(error = %e, "Chain-head signal failed"),
            }
        }

        self.state = MonitorState::Idle;
        info!(cycles = self.cycles, "Monitor loop stopped");
    }

    /// Process one chain-head event, unless a failed snapshot is still
    /// backing off. Returns the report of a completed cycle.
    pub async fn on_new_heads(&mut self, new_heads: u64) -> Option<CycleReport> {
        if let Some(retry_at) = self.retry_at {
            let now = Instant::now();
            if now < retry_at {
                debug!(
                    retry_in_ms = (retry_at - now).as_millis(),
                    "Snapshot backing off, skipping head"
                );
                return None;
            }
        }

        let result = self.run_cycle(new_heads).await;
        self.state = MonitorState::Idle;

        match result {
            Ok(report) => {
                self.backoff.reset();
                self.retry_at = None;
                report.log();
                Some(report)
            }
            Err(e) => {
                let wait = self.backoff.next_backoff().unwrap_or(self.config.backoff_max);
                self.retry_at = Some(Instant::now() + wait);
                warn!(error = %e, retry_in_ms = wait.as_millis(), "Snapshot failed, cycle aborted");
                None
            }
        }
    }

    /// Fetch, select and dispatch once. A snapshot failure aborts the
    /// cycle before anything is dispatched.
    #[instrument(skip(self), fields(cycle = self.cycles + 1))]
    pub async fn run_cycle(&mut self, new_heads: u64) -> Result<CycleReport, SourceError> {
        self.state = MonitorState::Processing;
        self.cycles += 1;

        if self.config.log_prices {
            self.log_prices().await;
        }

        let snapshot = self.source.fetch_positions(&self.config.query).await?;
        let mut report = CycleReport {
            new_heads,
            positions: snapshot.len(),
            ..Default::default()
        };

        let in_flight = &self.in_flight;
        let positions: Vec<Position> = snapshot
            .into_iter()
            .filter(|p| {
                let busy = in_flight.contains(&p.borrower);
                if busy {
                    debug!(borrower = %p.borrower, "Skipped: liquidation already in flight");
                }
                !busy
            })
            .collect();
        report.in_flight_skipped = report.positions - positions.len();

        let mut sequence = self.selector.parameters(&positions, &mut self.picker);
        for params in sequence.by_ref() {
            let Some(_guard) = self.in_flight.try_claim(params.borrower) else {
                report.in_flight_skipped += 1;
                debug!(borrower = %params.borrower, "Skipped: liquidation already in flight");
                continue;
            };
            let outcome = self.dispatcher.dispatch(&params).await;
            report.record(&outcome);
        }
        report.selection = *sequence.stats();

        Ok(report)
    }

    async fn log_prices(&self) {
        let Some(prices) = &self.prices else {
            return;
        };
        match prices.fetch_prices().await {
            Ok(prices) => {
                let sorted: BTreeMap<_, _> = prices.into_iter().collect();
                for (symbol, price_usd) in sorted {
                    debug!(symbol = %symbol, price_usd = price_usd, "Underlying price");
                }
            }
            Err(e) => warn!(error = %e, "Price query failed"),
        }
    }
}
