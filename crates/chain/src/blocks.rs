//! Chain-head watcher.
//!
//! Polls `eth_blockNumber` on a fixed interval and reports how many blocks
//! arrived since the previous observation.

use alloy::providers::{Provider, RootProvider};
use alloy::transports::http::reqwest::Url;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

/// Bound on a single `eth_blockNumber` round trip.
pub const DEFAULT_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval-driven block head poller.
pub struct BlockWatcher {
    rpc_url: Url,
    provider: RootProvider,
    ticker: Interval,
    request_timeout: Duration,
    last_seen: Option<u64>,
}

impl BlockWatcher {
    pub fn new(rpc_url: &str, poll_interval: Duration) -> Result<Self> {
        let rpc_url: Url = rpc_url.parse()?;
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self {
            provider: RootProvider::new_http(rpc_url.clone()),
            rpc_url,
            ticker,
            request_timeout: DEFAULT_HEAD_TIMEOUT,
            last_seen: None,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Last head this watcher observed.
    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Wait until at least one new block exists and return how many.
    ///
    /// RPC failures are returned after the tick that produced them; the
    /// watcher state is unchanged so the next call resumes normally.
    pub async fn wait_for_new_blocks(&mut self) -> Result<u64> {
        loop {
            self.ticker.tick().await;
            let head = tokio::time::timeout(self.request_timeout, self.provider.get_block_number())
                .await
                .map_err(|_| {
                    anyhow!("block number query timed out after {}ms", self.request_timeout.as_millis())
                })??;
            let new_blocks = self.observe(head);
            if new_blocks > 0 {
                debug!(head = head, new_blocks = new_blocks, "New chain head");
                return Ok(new_blocks);
            }
        }
    }

    /// Record an observed head. The first observation counts as one new
    /// block; a head that did not advance (or reorged lower) counts as zero.
    pub fn observe(&mut self, head: u64) -> u64 {
        match self.last_seen {
            None => {
                self.last_seen = Some(head);
                1
            }
            Some(prev) if head > prev => {
                self.last_seen = Some(head);
                head - prev
            }
            Some(_) => 0,
        }
    }
}

impl std::fmt::Debug for BlockWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWatcher")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("last_seen", &self.last_seen)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_observe_counts_new_heads() {
        let mut watcher = BlockWatcher::new("http://localhost:8545", Duration::from_millis(10)).unwrap();

        assert_eq!(watcher.observe(100), 1);
        assert_eq!(watcher.observe(100), 0);
        assert_eq!(watcher.observe(103), 3);
        // Lower head (reorg or lagging node) is not new
        assert_eq!(watcher.observe(101), 0);
        assert_eq!(watcher.last_seen(), Some(103));
    }

    #[tokio::test]
    async fn test_unresponsive_node_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut watcher = BlockWatcher::new(&format!("http://{addr}"), Duration::from_millis(10))
            .unwrap()
            .with_request_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(5), watcher.wait_for_new_blocks())
            .await
            .expect("watcher should give up on its own");

        assert!(result.unwrap_err().to_string().contains("timed out"));
        assert_eq!(watcher.last_seen(), None);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        assert!(BlockWatcher::new("not a url", Duration::from_secs(1)).is_err());
    }
}
