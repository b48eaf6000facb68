use crate::{
    error::DataError,
    normalise::RawRecord,
    provider::{SourceId, SourceProvider, TradeQuery, into_records},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use smol_str::SmolStr;
use tracing::debug;
use url::Url;

/// Default NEAR testnet JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://rpc.testnet.near.org";

/// Read-only contract view methods queried by [`ContractProvider`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ViewMethod {
    Portfolio,
    AllSentiments,
    SentimentHistory,
    TradeHistory,
}

impl ViewMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ViewMethod::Portfolio => "get_portfolio",
            ViewMethod::AllSentiments => "get_all_sentiments",
            ViewMethod::SentimentHistory => "get_sentiment_history",
            ViewMethod::TradeHistory => "get_trade_history",
        }
    }
}

/// [`SourceProvider`] backed by view calls on a deployed NEAR contract.
///
/// Every call is a single JSON-RPC `query` with `request_type: call_function` and
/// `finality: final`. A contract that is not deployed, a method that does not exist and any
/// RPC or transport error all surface as [`DataError::SourceUnavailable`].
#[derive(Debug, Clone)]
pub struct ContractProvider {
    client: Client,
    rpc_url: Url,
    contract_id: SmolStr,
}

#[derive(Debug, Serialize)]
struct ViewRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'static str,
    params: ViewParams<'a>,
}

#[derive(Debug, Serialize)]
struct ViewParams<'a> {
    request_type: &'static str,
    finality: &'static str,
    account_id: &'a str,
    method_name: &'static str,
    args_base64: String,
}

impl ContractProvider {
    pub fn new(client: Client, rpc_url: Url, contract_id: impl Into<SmolStr>) -> Self {
        Self {
            client,
            rpc_url,
            contract_id: contract_id.into(),
        }
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    /// Invoke a view method and decode its JSON result into records.
    async fn view(&self, method: ViewMethod, args: Value) -> Result<Vec<RawRecord>, DataError> {
        let request = ViewRequest {
            jsonrpc: "2.0",
            id: "dontcare",
            method: "query",
            params: ViewParams {
                request_type: "call_function",
                finality: "final",
                account_id: &self.contract_id,
                method_name: method.name(),
                args_base64: STANDARD.encode(args.to_string()),
            },
        };

        debug!(
            contract = %self.contract_id,
            method = method.name(),
            %args,
            "calling contract view"
        );

        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                DataError::unavailable(
                    SourceId::Contract,
                    format!("{} request failed: {error}", method.name()),
                )
            })?;

        if let Err(status_err) = response.error_for_status_ref() {
            return Err(DataError::unavailable(
                SourceId::Contract,
                format!("{} rpc status: {status_err}", method.name()),
            ));
        }

        let body = response.json::<Value>().await.map_err(|error| {
            DataError::unavailable(
                SourceId::Contract,
                format!("{} rpc body parse failed: {error}", method.name()),
            )
        })?;

        parse_view_response(method, body).map(into_records)
    }
}

#[async_trait]
impl SourceProvider for ContractProvider {
    fn id(&self) -> SourceId {
        SourceId::Contract
    }

    async fn fetch_portfolio(&self, account: Option<&str>) -> Result<Vec<RawRecord>, DataError> {
        self.view(ViewMethod::Portfolio, account_args(account)).await
    }

    async fn fetch_sentiments(&self) -> Result<Vec<RawRecord>, DataError> {
        self.view(ViewMethod::AllSentiments, json!({})).await
    }

    async fn fetch_sentiment_history(
        &self,
        asset: &str,
        days: usize,
    ) -> Result<Vec<RawRecord>, DataError> {
        self.view(
            ViewMethod::SentimentHistory,
            json!({ "crypto": asset, "days": days }),
        )
        .await
    }

    async fn fetch_trades(
        &self,
        account: Option<&str>,
        query: &TradeQuery,
    ) -> Result<Vec<RawRecord>, DataError> {
        let mut args = account_args(account);
        args["limit"] = json!(query.limit);
        if let Some(asset) = &query.asset {
            args["asset"] = json!(asset);
        }

        self.view(ViewMethod::TradeHistory, args).await
    }
}

fn account_args(account: Option<&str>) -> Value {
    match account {
        Some(account_id) => json!({ "account_id": account_id }),
        None => json!({}),
    }
}

/// Decode a NEAR JSON-RPC `call_function` response.
///
/// The view result is a byte array holding the method's JSON return value. RPC level errors
/// (`{"error": ..}`) and execution errors (`{"result": {"error": ..}}`, eg/ `CodeDoesNotExist`,
/// `MethodNotFound`) are both reported as [`DataError::SourceUnavailable`].
pub fn parse_view_response(method: ViewMethod, body: Value) -> Result<Value, DataError> {
    let unavailable = |reason: String| {
        DataError::unavailable(SourceId::Contract, format!("{}: {reason}", method.name()))
    };

    if let Some(error) = body.get("error") {
        let reason = error
            .pointer("/cause/name")
            .or_else(|| error.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(unavailable(reason));
    }

    let result = body
        .get("result")
        .ok_or_else(|| unavailable("rpc response missing result".to_string()))?;

    if let Some(error) = result.get("error") {
        let reason = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(unavailable(reason));
    }

    let bytes = result
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| unavailable("view result is not a byte array".to_string()))?
        .iter()
        .map(|byte| {
            byte.as_u64()
                .and_then(|byte| u8::try_from(byte).ok())
                .ok_or_else(|| unavailable(format!("invalid view result byte: {byte}")))
        })
        .collect::<Result<Vec<u8>, DataError>>()?;

    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes)
        .map_err(|error| unavailable(format!("view result is not JSON: {error}")))
}
