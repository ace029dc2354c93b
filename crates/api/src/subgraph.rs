//! Lending subgraph client for underwater account discovery.
//!
//! Queries the Banker Joe lending subgraph (TheGraph) for accounts inside a
//! health-factor band and for the per-market underlying USD prices.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default endpoint of the Trader Joe lending subgraph.
pub const DEFAULT_SUBGRAPH_URL: &str =
    "https://api.thegraph.com/subgraphs/name/traderjoe-xyz/lending";

/// Whole-request timeout (connect, send and body) unless configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MARKETS_QUERY: &str = "{ markets { id symbol underlyingPriceUSD } }";

/// Errors raised while talking to the subgraph.
#[derive(Debug, Error)]
pub enum SubgraphError {
    /// Connection, TLS or timeout failure.
    #[error("subgraph request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("subgraph returned HTTP {status}")]
    Http { status: u16 },

    /// GraphQL-level errors in the response body.
    #[error("subgraph query error: {0}")]
    Query(String),

    /// Body did not have the expected shape.
    #[error("malformed subgraph response: {0}")]
    Malformed(String),
}

/// Health and borrow-size window for the underwater account query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountFilter {
    /// Exclusive lower bound on account health
    pub health_gt: f64,
    /// Exclusive upper bound on account health
    pub health_lt: f64,
    /// Exclusive lower bound on total borrow value (USD)
    pub borrow_value_usd_gt: f64,
}

impl Default for AccountFilter {
    fn default() -> Self {
        Self {
            health_gt: 0.0,
            health_lt: 1.0,
            borrow_value_usd_gt: 0.0,
        }
    }
}

impl AccountFilter {
    /// Render the `accounts(where: ...)` GraphQL query for this window.
    pub fn to_query(&self) -> String {
        format!(
            r#"{{
  accounts(where: {{
        health_gt: {},
        health_lt: {},
        totalBorrowValueInUSD_gt: {} }}
    ) {{
    id
    health
    totalBorrowValueInUSD
    totalCollateralValueInUSD
    tokens {{
        id
        symbol
        supplyBalanceUnderlying
        borrowBalanceUnderlying
        enteredMarket
    }}
  }}
}}"#,
            self.health_gt, self.health_lt, self.borrow_value_usd_gt
        )
    }
}

/// Subgraph API client.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    url: String,
}

impl Default for SubgraphClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SubgraphClient {
    /// Create a client for the public Trader Joe lending subgraph.
    pub fn new() -> Self {
        Self::with_url(DEFAULT_SUBGRAPH_URL)
    }

    /// Create a client against a custom subgraph URL with the default timeout.
    ///
    /// Falls back to a client without a timeout only if the TLS backend
    /// cannot be initialised; use [`with_timeout`](Self::with_timeout) to
    /// surface that error instead.
    pub fn with_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let client = build_http_client(DEFAULT_REQUEST_TIMEOUT).unwrap_or_else(|e| {
            warn!(error = %e, "HTTP client builder failed, requests have no timeout");
            reqwest::Client::new()
        });
        Self { client, url }
    }

    /// Create a client whose requests fail with [`SubgraphError::Transport`]
    /// once `timeout` elapses.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, SubgraphError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            url: url.into(),
        })
    }

    /// Endpoint this client queries.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch accounts inside the given health window.
    ///
    /// Accounts that fail to decode are dropped with a warning; only
    /// transport and query failures abort the call.
    #[instrument(skip(self))]
    pub async fn fetch_underwater_accounts(
        &self,
        filter: &AccountFilter,
    ) -> Result<Vec<SubgraphAccount>, SubgraphError> {
        let data = self.post_query(&filter.to_query()).await?;
        let (accounts, skipped) = decode_accounts(data)?;

        info!(
            accounts = accounts.len(),
            skipped_malformed = skipped,
            health_gt = filter.health_gt,
            health_lt = filter.health_lt,
            "Fetched underwater accounts"
        );

        Ok(accounts)
    }

    /// Fetch the current underlying USD price of every market, keyed by symbol.
    #[instrument(skip(self))]
    pub async fn fetch_underlying_prices(&self) -> Result<HashMap<String, f64>, SubgraphError> {
        let data = self.post_query(MARKETS_QUERY).await?;
        let response: MarketsData = serde_json::from_value(data)
            .map_err(|e| SubgraphError::Malformed(e.to_string()))?;

        let prices: HashMap<String, f64> = response
            .markets
            .into_iter()
            .map(|m| (m.symbol, m.underlying_price_usd))
            .collect();

        debug!(markets = prices.len(), "Fetched underlying prices");
        Ok(prices)
    }

    async fn post_query(&self, query: &str) -> Result<serde_json::Value, SubgraphError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubgraphError::Http {
                status: status.as_u16(),
            });
        }

        let body: GraphQlResponse = response.json().await?;
        body.into_data()
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl GraphQlResponse {
    fn into_data(self) -> Result<serde_json::Value, SubgraphError> {
        if let Some(errors) = self.errors.filter(|e| !e.is_empty()) {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SubgraphError::Query(joined));
        }
        self.data
            .ok_or_else(|| SubgraphError::Malformed("response has no data".to_string()))
    }
}

/// Decode `data.accounts` one entry at a time so a single bad account
/// does not poison the batch. Returns the decoded accounts and the
/// number skipped.
fn decode_accounts(
    mut data: serde_json::Value,
) -> Result<(Vec<SubgraphAccount>, usize), SubgraphError> {
    let Some(serde_json::Value::Array(entries)) = data.get_mut("accounts").map(|v| v.take()) else {
        return Err(SubgraphError::Malformed(
            "expected `accounts` array".to_string(),
        ));
    };

    let mut accounts = Vec::with_capacity(entries.len());
    let mut skipped = 0;

    for entry in entries {
        let id = entry
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("<missing id>")
            .to_string();
        match serde_json::from_value::<SubgraphAccount>(entry) {
            Ok(account) => accounts.push(account),
            Err(e) => {
                warn!(account = %id, error = %e, "Skipping malformed subgraph account");
                skipped += 1;
            }
        }
    }

    Ok((accounts, skipped))
}

/// Account entry from the lending subgraph.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphAccount {
    /// Borrower address
    #[serde(deserialize_with = "deserialize_address")]
    pub id: Address,

    /// Account health (absent for accounts with no borrows)
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub health: Option<f64>,

    /// Total borrow value in USD
    #[serde(rename = "totalBorrowValueInUSD", deserialize_with = "deserialize_f64_from_string")]
    pub total_borrow_value_usd: f64,

    /// Total collateral value in USD
    #[serde(rename = "totalCollateralValueInUSD", deserialize_with = "deserialize_f64_from_string")]
    pub total_collateral_value_usd: f64,

    /// Per-market balances
    #[serde(default)]
    pub tokens: Vec<SubgraphToken>,
}

/// Per-market balance of one account.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphToken {
    /// `<market address>-<account address>`
    pub id: String,

    /// Market symbol (e.g. "jUSDC")
    pub symbol: String,

    /// Supplied amount in underlying units
    #[serde(deserialize_with = "deserialize_f64_from_string")]
    pub supply_balance_underlying: f64,

    /// Borrowed amount in underlying units
    #[serde(deserialize_with = "deserialize_f64_from_string")]
    pub borrow_balance_underlying: f64,

    /// Whether the supply is posted as collateral
    pub entered_market: bool,
}

impl SubgraphToken {
    /// Market (jToken) address encoded in the token id.
    ///
    /// Subgraph addresses are lowercase and unchecksummed; parsing is
    /// case-insensitive.
    pub fn market(&self) -> Option<Address> {
        self.id.split('-').next()?.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
struct MarketsData {
    markets: Vec<MarketPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketPrice {
    symbol: String,
    #[serde(rename = "underlyingPriceUSD", deserialize_with = "deserialize_f64_from_string")]
    underlying_price_usd: f64,
}

// Custom deserializers

fn deserialize_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_f64_from_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(f64),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        StringOrNumber::Number(n) => Ok(n),
    }
}

fn deserialize_optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(f64),
    }

    match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) if s.is_empty() => Ok(None),
        Some(StringOrNumber::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(StringOrNumber::Number(n)) => Ok(Some(n)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNTS_JSON: &str = r#"{
        "accounts": [
            {
                "id": "0xd9233c98d84e50f07b122ee0de0a6a50f49127e0",
                "health": "0.040151181763124301",
                "totalBorrowValueInUSD": "8414.278374",
                "totalCollateralValueInUSD": "8752.1215944",
                "tokens": [
                    {
                        "id": "0x8b650e26404ac6837539ca96812f0123601e4448-0xd9233c98d84e50f07b122ee0de0a6a50f49127e0",
                        "symbol": "jUSDT",
                        "supplyBalanceUnderlying": "0",
                        "borrowBalanceUnderlying": "0",
                        "enteredMarket": true
                    },
                    {
                        "id": "0xed6aaf91a2b084bd594dbd1245be3691f9f637ac-0xd9233c98d84e50f07b122ee0de0a6a50f49127e0",
                        "symbol": "jUSDC",
                        "supplyBalanceUnderlying": "10940.151993880858163609064043",
                        "borrowBalanceUnderlying": "8479.700995064730131663373878343748",
                        "enteredMarket": true
                    }
                ]
            },
            {
                "id": "not-an-address",
                "totalBorrowValueInUSD": "1",
                "totalCollateralValueInUSD": "1",
                "tokens": []
            },
            {
                "id": "0x0af3318c4060eac02d50e140de2fb0e492b59ecb",
                "totalBorrowValueInUSD": "12.5",
                "totalCollateralValueInUSD": "10",
                "tokens": [
                    {
                        "id": "0x585e7bc75089ed111b656faa7aeb1104f5b96c15-0x0af3318c4060eac02d50e140de2fb0e492b59ecb",
                        "symbol": "jLINK",
                        "supplyBalanceUnderlying": "abc",
                        "borrowBalanceUnderlying": "0",
                        "enteredMarket": true
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_decode_accounts_skips_malformed() {
        let data: serde_json::Value = serde_json::from_str(ACCOUNTS_JSON).unwrap();
        let (accounts, skipped) = decode_accounts(data).unwrap();

        assert_eq!(accounts.len(), 1);
        assert_eq!(skipped, 2);

        let account = &accounts[0];
        assert_eq!(
            account.id,
            "0xd9233c98d84e50f07b122ee0de0a6a50f49127e0".parse::<Address>().unwrap()
        );
        assert!((account.health.unwrap() - 0.0401).abs() < 0.001);
        assert_eq!(account.tokens.len(), 2);
        assert!((account.tokens[1].supply_balance_underlying - 10940.15).abs() < 0.01);
        assert!((account.tokens[1].borrow_balance_underlying - 8479.70).abs() < 0.01);
    }

    #[test]
    fn test_token_market_parsing() {
        let token = SubgraphToken {
            id: "0xed6aaf91a2b084bd594dbd1245be3691f9f637ac-0xd9233c98d84e50f07b122ee0de0a6a50f49127e0"
                .to_string(),
            symbol: "jUSDC".to_string(),
            supply_balance_underlying: 0.0,
            borrow_balance_underlying: 0.0,
            entered_market: true,
        };
        assert_eq!(
            token.market(),
            Some("0xEd6AaF91a2B084bd594DBd1245be3691F9f637aC".parse().unwrap())
        );

        let bad = SubgraphToken {
            id: "garbage".to_string(),
            ..token
        };
        assert_eq!(bad.market(), None);
    }

    #[test]
    fn test_missing_accounts_array_is_malformed() {
        let data = serde_json::json!({ "markets": [] });
        assert!(matches!(decode_accounts(data), Err(SubgraphError::Malformed(_))));
    }

    #[test]
    fn test_graphql_errors_surface() {
        let body: GraphQlResponse = serde_json::from_str(
            r#"{ "errors": [ { "message": "indexer unavailable" } ] }"#,
        )
        .unwrap();
        match body.into_data() {
            Err(SubgraphError::Query(msg)) => assert_eq!(msg, "indexer unavailable"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_account_query_contains_bounds() {
        let filter = AccountFilter {
            health_gt: 0.0,
            health_lt: 1.0,
            borrow_value_usd_gt: 250.0,
        };
        let query = filter.to_query();
        assert!(query.contains("health_gt: 0,"));
        assert!(query.contains("health_lt: 1,"));
        assert!(query.contains("totalBorrowValueInUSD_gt: 250 }"));
        assert!(query.contains("enteredMarket"));
    }

    #[test]
    fn test_decode_market_prices() {
        let data = serde_json::json!({
            "markets": [
                { "id": "0xc22f01ddc8010ee05574028528614634684ec29e", "symbol": "jAVAX", "underlyingPriceUSD": "84.21" },
                { "id": "0xed6aaf91a2b084bd594dbd1245be3691f9f637ac", "symbol": "jUSDC", "underlyingPriceUSD": "1.0001" }
            ]
        });
        let parsed: MarketsData = serde_json::from_value(data).unwrap();
        assert_eq!(parsed.markets.len(), 2);
        assert_eq!(parsed.markets[0].symbol, "jAVAX");
        assert!((parsed.markets[1].underlying_price_usd - 1.0001).abs() < 1e-9);
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_unresponsive_subgraph_times_out() {
        let url = silent_server().await;
        let client = SubgraphClient::with_timeout(url, Duration::from_millis(200)).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.fetch_underwater_accounts(&AccountFilter::default()),
        )
        .await
        .expect("request was not bounded by the client timeout");
        match result {
            Err(SubgraphError::Transport(e)) => assert!(e.is_timeout()),
            other => panic!("expected transport timeout, got {other:?}"),
        }

        let prices = tokio::time::timeout(Duration::from_secs(5), client.fetch_underlying_prices())
            .await
            .expect("request was not bounded by the client timeout");
        assert!(matches!(prices, Err(SubgraphError::Transport(_))));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_fetch_underwater_accounts() {
        let client = SubgraphClient::new();
        let accounts = client
            .fetch_underwater_accounts(&AccountFilter::default())
            .await;
        assert!(accounts.is_ok());
    }
}
