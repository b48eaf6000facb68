use crate::{
    error::DataError,
    normalise::RawRecord,
    provider::{SourceId, SourceProvider, TradeQuery, into_records},
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Default base URL of the dashboard REST backend.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";

/// Keys under which REST responses nest their record arrays.
const ENVELOPE_KEYS: [&str; 5] = ["assets", "data", "history", "trades", "sentiments"];

/// [`SourceProvider`] backed by the dashboard REST backend.
///
/// | Operation | Endpoint |
/// |---|---|
/// | portfolio | `GET /api/portfolio[?account=]` |
/// | sentiments | `GET /api/sentiment` |
/// | sentiment history | `GET /api/sentiment/history?crypto=&days=` |
/// | trades | `GET /api/trades?limit=[&asset=][&account=]` |
#[derive(Debug, Clone)]
pub struct ApiProvider {
    client: Client,
    base_url: Url,
}

impl ApiProvider {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Build the endpoint URL for `path` with the provided query parameters appended verbatim.
    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, DataError> {
        let mut url = self.base_url.join(path).map_err(|error| {
            DataError::unavailable(SourceId::Api, format!("invalid endpoint {path}: {error}"))
        })?;

        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(key, value)| (*key, value.as_str())));
        }

        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Vec<RawRecord>, DataError> {
        debug!(%url, "requesting dashboard api");

        let response = self.client.get(url.clone()).send().await.map_err(|error| {
            DataError::unavailable(SourceId::Api, format!("request failed ({url}): {error}"))
        })?;

        if let Err(status_err) = response.error_for_status_ref() {
            return Err(DataError::unavailable(
                SourceId::Api,
                format!("HTTP error ({url}): {status_err}"),
            ));
        }

        let body = response.json::<Value>().await.map_err(|error| {
            DataError::unavailable(SourceId::Api, format!("parse failed ({url}): {error}"))
        })?;

        Ok(into_records(unwrap_envelope(body)))
    }
}

#[async_trait]
impl SourceProvider for ApiProvider {
    fn id(&self) -> SourceId {
        SourceId::Api
    }

    async fn fetch_portfolio(&self, account: Option<&str>) -> Result<Vec<RawRecord>, DataError> {
        let params = account
            .map(|account| vec![("account", account.to_string())])
            .unwrap_or_default();

        self.get(self.endpoint("/api/portfolio", &params)?).await
    }

    async fn fetch_sentiments(&self) -> Result<Vec<RawRecord>, DataError> {
        self.get(self.endpoint("/api/sentiment", &[])?).await
    }

    async fn fetch_sentiment_history(
        &self,
        asset: &str,
        days: usize,
    ) -> Result<Vec<RawRecord>, DataError> {
        let params = [("crypto", asset.to_string()), ("days", days.to_string())];
        self.get(self.endpoint("/api/sentiment/history", &params)?)
            .await
    }

    async fn fetch_trades(
        &self,
        account: Option<&str>,
        query: &TradeQuery,
    ) -> Result<Vec<RawRecord>, DataError> {
        self.get(self.endpoint("/api/trades", &trade_params(account, query))?)
            .await
    }
}

fn trade_params(account: Option<&str>, query: &TradeQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", query.limit.to_string())];

    if let Some(asset) = &query.asset {
        params.push(("asset", asset.to_string()));
    }

    if let Some(account) = account {
        params.push(("account", account.to_string()));
    }

    params
}

/// Unwrap a transport envelope such as `{ "totalValue": .., "assets": [..] }` down to its record
/// array. Bodies without a recognised envelope are returned as-is.
pub fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut fields) => {
            let key = ENVELOPE_KEYS
                .iter()
                .find(|key| fields.get(**key).is_some_and(Value::is_array));

            match key {
                Some(key) => fields.remove(*key).unwrap_or(Value::Null),
                None => Value::Object(fields),
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ApiProvider {
        ApiProvider::new(Client::new(), Url::parse(DEFAULT_API_URL).unwrap())
    }

    #[test]
    fn test_unwrap_envelope() {
        struct TestCase {
            input: Value,
            expected: Value,
        }

        let tests = vec![
            TestCase {
                // TC0: portfolio envelope
                input: json!({
                    "totalValue": 41600,
                    "assets": [{"symbol": "BTC", "allocation": 35, "percentage": 35}]
                }),
                expected: json!([{"symbol": "BTC", "allocation": 35, "percentage": 35}]),
            },
            TestCase {
                // TC1: bare array
                input: json!([{"symbol": "ETH", "score": 0.62}]),
                expected: json!([{"symbol": "ETH", "score": 0.62}]),
            },
            TestCase {
                // TC2: single record stays a record
                input: json!({"symbol": "NEAR", "score": 0.81, "change": 0.36}),
                expected: json!({"symbol": "NEAR", "score": 0.81, "change": 0.36}),
            },
            TestCase {
                // TC3: non-array envelope key is not unwrapped
                input: json!({"data": "maintenance"}),
                expected: json!({"data": "maintenance"}),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = unwrap_envelope(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_trade_endpoint_passes_filters_verbatim() {
        let query = TradeQuery::new(5).with_asset("SOL");
        let url = provider()
            .endpoint("/api/trades", &trade_params(Some("alice.testnet"), &query))
            .unwrap();

        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:3000/api/trades?limit=5&asset=SOL&account=alice.testnet"
        );
    }

    #[test]
    fn test_endpoint_without_params() {
        let url = provider().endpoint("/api/sentiment", &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/api/sentiment");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let provider = ApiProvider::new(Client::new(), Url::parse("http://127.0.0.1:9").unwrap());

        let actual = provider.fetch_sentiments().await;

        assert!(matches!(
            actual,
            Err(DataError::SourceUnavailable {
                provider: SourceId::Api,
                ..
            })
        ));
    }
}
