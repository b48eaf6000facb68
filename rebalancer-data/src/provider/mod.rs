use crate::{error::DataError, normalise::RawRecord};
use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// On-chain view calls through NEAR JSON-RPC.
pub mod contract;

/// REST backend endpoints.
pub mod api;

/// Fixed in-memory dataset of the demo wallet.
pub mod demo;

/// Default number of trades requested when no limit is supplied.
pub const DEFAULT_TRADE_LIMIT: usize = 10;

/// Unique identifier for a data source that can appear in a fallback chain.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    #[display("demo")]
    Demo,
    #[display("contract")]
    Contract,
    #[display("api")]
    Api,
    #[display("simulated")]
    Simulated,
}

impl SourceId {
    /// Determine if data produced by this source is synthetic rather than real account data.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, SourceId::Demo | SourceId::Simulated)
    }
}

/// Optional trade history filters, passed through to the source verbatim.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct TradeQuery {
    pub limit: usize,
    pub asset: Option<SmolStr>,
}

impl Default for TradeQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_TRADE_LIMIT,
            asset: None,
        }
    }
}

impl TradeQuery {
    pub fn new(limit: usize) -> Self {
        Self { limit, asset: None }
    }

    pub fn with_asset(mut self, asset: impl Into<SmolStr>) -> Self {
        self.asset = Some(asset.into());
        self
    }
}

/// Swappable query backend exposing the four dataset operations.
///
/// Implementations return raw, source-shaped records and never normalise, retry or fall back
/// internally. Any transport, status or contract error is reported as
/// [`DataError::SourceUnavailable`].
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// [`SourceId`] this provider answers for in a fallback chain.
    fn id(&self) -> SourceId;

    /// Portfolio allocations, scoped to `account` when one is supplied.
    async fn fetch_portfolio(&self, account: Option<&str>) -> Result<Vec<RawRecord>, DataError>;

    /// Market-wide sentiment scores.
    async fn fetch_sentiments(&self) -> Result<Vec<RawRecord>, DataError>;

    /// Daily sentiment history of `asset` over the last `days` days.
    async fn fetch_sentiment_history(
        &self,
        asset: &str,
        days: usize,
    ) -> Result<Vec<RawRecord>, DataError>;

    /// Trade history, scoped to `account` when one is supplied.
    async fn fetch_trades(
        &self,
        account: Option<&str>,
        query: &TradeQuery,
    ) -> Result<Vec<RawRecord>, DataError>;
}

/// Flatten a response body into a record list: arrays yield their items, `null` yields nothing
/// and any other value is a single record.
pub(crate) fn into_records(body: serde_json::Value) -> Vec<RawRecord> {
    match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    }
}
