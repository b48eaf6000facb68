use crate::{
    error::DataError,
    normalise::RawRecord,
    provider::{SourceId, SourceProvider, TradeQuery},
};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Fixed dataset of the demo wallet.
///
/// Only portfolio and trades are held: demo sentiment is always synthesised, so the sentiment
/// operations answer empty and the chain moves on to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoDataset {
    pub portfolio: Vec<RawRecord>,
    pub trades: Vec<RawRecord>,
}

impl Default for DemoDataset {
    fn default() -> Self {
        Self {
            portfolio: vec![
                json!({"asset": "BTC", "percentage": 40}),
                json!({"asset": "ETH", "percentage": 30}),
                json!({"asset": "NEAR", "percentage": 20}),
                json!({"asset": "SOL", "percentage": 10}),
            ],
            trades: vec![
                json!({"timestamp": "2023-12-05T15:32:11Z", "type": "buy", "asset": "BTC", "amount": "0.05", "sentiment": 0.78}),
                json!({"timestamp": "2023-12-05T14:21:03Z", "type": "sell", "asset": "SOL", "amount": "12.5", "sentiment": -0.25}),
                json!({"timestamp": "2023-12-04T18:45:30Z", "type": "buy", "asset": "NEAR", "amount": "125", "sentiment": 0.81}),
                json!({"timestamp": "2023-12-04T09:12:45Z", "type": "buy", "asset": "ETH", "amount": "1.2", "sentiment": 0.62}),
                json!({"timestamp": "2023-12-03T16:33:57Z", "type": "buy", "asset": "BTC", "amount": "0.03", "sentiment": 0.65}),
                json!({"timestamp": "2023-12-02T10:27:19Z", "type": "sell", "asset": "SOL", "amount": "18.7", "sentiment": -0.15}),
                json!({"timestamp": "2023-12-01T13:59:01Z", "type": "buy", "asset": "NEAR", "amount": "80", "sentiment": 0.73}),
            ],
        }
    }
}

/// In-memory [`SourceProvider`] serving a [`DemoDataset`]. Never fails.
#[derive(Debug, Clone, Default)]
pub struct DemoProvider {
    dataset: DemoDataset,
}

impl DemoProvider {
    pub fn new(dataset: DemoDataset) -> Self {
        Self { dataset }
    }
}

#[async_trait]
impl SourceProvider for DemoProvider {
    fn id(&self) -> SourceId {
        SourceId::Demo
    }

    async fn fetch_portfolio(&self, _: Option<&str>) -> Result<Vec<RawRecord>, DataError> {
        Ok(self.dataset.portfolio.clone())
    }

    async fn fetch_sentiments(&self) -> Result<Vec<RawRecord>, DataError> {
        Ok(Vec::new())
    }

    async fn fetch_sentiment_history(&self, _: &str, _: usize) -> Result<Vec<RawRecord>, DataError> {
        Ok(Vec::new())
    }

    async fn fetch_trades(
        &self,
        _: Option<&str>,
        query: &TradeQuery,
    ) -> Result<Vec<RawRecord>, DataError> {
        Ok(self
            .dataset
            .trades
            .iter()
            .filter(|trade| match &query.asset {
                Some(asset) => trade
                    .get("asset")
                    .and_then(Value::as_str)
                    .is_some_and(|traded| traded.eq_ignore_ascii_case(asset)),
                None => true,
            })
            .take(query.limit)
            .cloned()
            .collect())
    }
}
