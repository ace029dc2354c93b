//! Banker Joe API clients for external services.
//!
//! This crate provides an HTTP client for the lending subgraph:
//! - Underwater account discovery by health-factor window
//! - Underlying market prices (informational)

mod subgraph;

pub use subgraph::{
    AccountFilter, SubgraphAccount, SubgraphClient, SubgraphError, SubgraphToken,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SUBGRAPH_URL,
};
