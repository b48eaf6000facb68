//! Fallback resolution.
//!
//! For each dataset kind and [`AccountMode`] the resolver walks an explicit, ordered chain of
//! sources ([`fallback_chain`]), stopping at the first source that yields at least one usable
//! canonical record. Failures and empty answers advance the chain, and the chain always ends in
//! [`SourceId::Simulated`], which cannot fail. Nothing in here returns an error to the caller.

use crate::{
    account::{AccountContext, AccountMode},
    config::{DashboardConfig, MAX_HISTORY_DAYS},
    error::DataError,
    model::{
        Allocation, DEFAULT_ASSET, DatasetKind, HistoryPoint, HistorySeries, SentimentScore,
        TradeRecord,
    },
    normalise::{self, RawRecord},
    provider::{
        SourceId, SourceProvider, TradeQuery, api::ApiProvider, contract::ContractProvider,
        demo::DemoProvider,
    },
    simulate,
};
use chrono::{Days, NaiveDate, Utc};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use serde::Serialize;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

/// Result of querying a single source within a fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Source yielded this many usable canonical records.
    Success(usize),
    /// Source answered, but nothing usable survived normalisation.
    Empty,
    Failed(DataError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub source: SourceId,
    pub outcome: AttemptOutcome,
}

/// Canonical records of one dataset kind plus the trail of how they were obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution<T> {
    pub records: Vec<T>,
    /// Source that produced `records`.
    pub source: SourceId,
    /// Every source queried, in order, with its outcome. A non-synthetic `source` is the
    /// final, successful entry.
    pub attempts: Vec<Attempt>,
    /// Entries missing from `source` that were synthesised individually (assets for sentiment,
    /// ISO dates for history).
    pub backfilled: Vec<SmolStr>,
}

impl<T> Resolution<T> {
    fn new(records: Vec<T>, source: SourceId, attempts: Vec<Attempt>) -> Self {
        Self {
            records,
            source,
            attempts,
            backfilled: Vec::new(),
        }
    }

    /// Determine if any part of this result is demo or simulated data.
    pub fn is_synthetic(&self) -> bool {
        self.source.is_synthetic() || !self.backfilled.is_empty()
    }
}

/// Portfolio, sentiment and trade resolutions for one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardResolution {
    pub portfolio: Resolution<Allocation>,
    pub sentiments: Resolution<SentimentScore>,
    pub trades: Resolution<TradeRecord>,
}

/// Ordered sources attempted for `kind` under `mode`. Always ends in [`SourceId::Simulated`].
///
/// | Mode | Portfolio, trades | Sentiment, history |
/// |---|---|---|
/// | demo | demo, simulated | demo, simulated |
/// | contract identified | contract, api, simulated | api, simulated |
/// | authenticated generic | contract, api, simulated | api, simulated |
/// | anonymous | api, simulated | api, simulated |
pub fn fallback_chain(mode: AccountMode, kind: DatasetKind) -> Vec<SourceId> {
    use SourceId::*;

    let market_wide = matches!(kind, DatasetKind::Sentiments | DatasetKind::SentimentHistory);

    match mode {
        AccountMode::Demo => vec![Demo, Simulated],
        AccountMode::ContractIdentified | AccountMode::AuthenticatedGeneric if !market_wide => {
            vec![Contract, Api, Simulated]
        }
        AccountMode::ContractIdentified
        | AccountMode::AuthenticatedGeneric
        | AccountMode::Anonymous => vec![Api, Simulated],
    }
}

/// Single provider operation issued while walking a chain.
#[derive(Debug, Clone, Copy)]
enum Request<'a> {
    Portfolio { account: Option<&'a str> },
    Sentiments,
    History { asset: &'a str, days: usize },
    Trades {
        account: Option<&'a str>,
        query: &'a TradeQuery,
    },
}

impl<'a> Request<'a> {
    fn kind(&self) -> DatasetKind {
        match self {
            Request::Portfolio { .. } => DatasetKind::Portfolio,
            Request::Sentiments => DatasetKind::Sentiments,
            Request::History { .. } => DatasetKind::SentimentHistory,
            Request::Trades { .. } => DatasetKind::Trades,
        }
    }

    /// Issue the request. Only the contract provider is account-scoped; every other source is
    /// always queried generically.
    async fn dispatch(
        &self,
        provider: &dyn SourceProvider,
    ) -> Result<Vec<RawRecord>, DataError> {
        let scoped = |account: Option<&'a str>| match provider.id() {
            SourceId::Contract => account,
            _ => None,
        };

        match *self {
            Request::Portfolio { account } => provider.fetch_portfolio(scoped(account)).await,
            Request::Sentiments => provider.fetch_sentiments().await,
            Request::History { asset, days } => {
                provider.fetch_sentiment_history(asset, days).await
            }
            Request::Trades { account, query } => {
                provider.fetch_trades(scoped(account), query).await
            }
        }
    }
}

/// Orchestrates provider fallback per dataset kind and account mode.
#[derive(Clone)]
pub struct FallbackResolver {
    providers: FnvHashMap<SourceId, Arc<dyn SourceProvider>>,
    request_timeout: Duration,
    default_assets: Vec<SmolStr>,
}

impl std::fmt::Debug for FallbackResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackResolver")
            .field("providers", &self.providers.keys().sorted().collect::<Vec<_>>())
            .field("request_timeout", &self.request_timeout)
            .field("default_assets", &self.default_assets)
            .finish()
    }
}

impl FallbackResolver {
    /// Construct a [`FallbackResolver`] with no providers. Every chain resolves to simulated
    /// data until providers are added.
    pub fn new(request_timeout: Duration, default_assets: Vec<SmolStr>) -> Self {
        Self {
            providers: FnvHashMap::default(),
            request_timeout,
            default_assets,
        }
    }

    /// Register a provider under its [`SourceProvider::id`], replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    /// Construct a [`FallbackResolver`] wired to the demo dataset, the REST backend and, when a
    /// contract is deployed, the contract.
    ///
    /// A malformed endpoint URL leaves that provider unregistered, so its chain entries fail
    /// over like any unavailable source.
    pub fn from_config(config: &DashboardConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|error| {
                warn!(%error, "failed to build http client with timeout, using defaults");
                reqwest::Client::new()
            });

        let mut resolver = Self::new(config.request_timeout, config.default_assets.clone())
            .with_provider(Arc::new(DemoProvider::default()));

        match Url::parse(&config.api_url) {
            Ok(base_url) => {
                resolver = resolver.with_provider(Arc::new(ApiProvider::new(client.clone(), base_url)))
            }
            Err(error) => warn!(url = %config.api_url, %error, "invalid api url, api source disabled"),
        }

        match (&config.contract_id, Url::parse(&config.rpc_url)) {
            (Some(contract_id), Ok(rpc_url)) => {
                resolver = resolver.with_provider(Arc::new(ContractProvider::new(
                    client,
                    rpc_url,
                    contract_id.clone(),
                )))
            }
            (Some(_), Err(error)) => {
                warn!(url = %config.rpc_url, %error, "invalid rpc url, contract source disabled")
            }
            (None, _) => info!("no contract deployed, contract source disabled"),
        }

        resolver
    }

    /// Asset universe used when nothing determines the account's holdings.
    pub fn default_assets(&self) -> Vec<SmolStr> {
        match self.default_assets.is_empty() {
            true => vec![SmolStr::new_static(DEFAULT_ASSET)],
            false => self.default_assets.clone(),
        }
    }

    /// Resolve portfolio, trades and market sentiment concurrently, then reconcile sentiment
    /// against the resolved holdings.
    pub async fn resolve_dashboard(
        &self,
        context: &AccountContext,
        query: &TradeQuery,
    ) -> DashboardResolution {
        let (portfolio, trades, (fetched, attempts)) = tokio::join!(
            self.resolve_portfolio(context),
            self.resolve_trades(context, query),
            self.fetch_sentiments(context),
        );

        let assets = self.holdings(&portfolio.records);
        let sentiments = self.finish_sentiments(context, fetched, attempts, &assets);

        DashboardResolution {
            portfolio,
            sentiments,
            trades,
        }
    }

    /// Resolve the account's portfolio allocations. Never empty.
    pub async fn resolve_portfolio(&self, context: &AccountContext) -> Resolution<Allocation> {
        let request = Request::Portfolio {
            account: context.contract_scope(),
        };

        let (found, attempts) = self
            .query_chain(context.mode, request, reconcile_allocations)
            .await;

        let resolution = match found {
            Some((source, records)) => Resolution::new(records, source, attempts),
            None => Resolution::new(
                simulate::portfolio(&self.default_assets()),
                SourceId::Simulated,
                attempts,
            ),
        };

        log_resolution(context, DatasetKind::Portfolio, &resolution);
        resolution
    }

    /// Resolve market-wide sentiment for `assets`, in the order given, backfilling any asset the
    /// resolved source does not cover.
    pub async fn resolve_sentiments(
        &self,
        context: &AccountContext,
        assets: &[SmolStr],
    ) -> Resolution<SentimentScore> {
        let (fetched, attempts) = self.fetch_sentiments(context).await;
        self.finish_sentiments(context, fetched, attempts, assets)
    }

    /// Resolve exactly `days` days of sentiment history for `asset`, oldest first, ending today.
    /// `days` is capped at [`MAX_HISTORY_DAYS`].
    pub async fn resolve_history(
        &self,
        context: &AccountContext,
        asset: &str,
        days: usize,
    ) -> Resolution<HistoryPoint> {
        let days = days.min(MAX_HISTORY_DAYS);
        let today = Utc::now().date_naive();
        let request = Request::History { asset, days };

        let (found, attempts) = self
            .query_chain(context.mode, request, |raw| {
                reconcile_history(raw, days, today)
            })
            .await;

        let resolution = match found {
            Some((source, points)) => {
                let (points, backfilled) = backfill_history(asset, points, days, today);
                Resolution {
                    records: points,
                    source,
                    attempts,
                    backfilled,
                }
            }
            None => Resolution::new(
                simulate::history(asset, days).points,
                SourceId::Simulated,
                attempts,
            ),
        };

        log_resolution(context, DatasetKind::SentimentHistory, &resolution);
        resolution
    }

    /// Resolve trade history, newest first and at most `query.limit` entries.
    pub async fn resolve_trades(
        &self,
        context: &AccountContext,
        query: &TradeQuery,
    ) -> Resolution<TradeRecord> {
        let request = Request::Trades {
            account: context.contract_scope(),
            query,
        };

        let (found, attempts) = self
            .query_chain(context.mode, request, |raw| reconcile_trades(raw, query))
            .await;

        let resolution = match found {
            Some((source, records)) => Resolution::new(records, source, attempts),
            None => Resolution::new(
                simulate::trades(&self.default_assets(), query),
                SourceId::Simulated,
                attempts,
            ),
        };

        log_resolution(context, DatasetKind::Trades, &resolution);
        resolution
    }

    /// Asset set of a resolved portfolio, substituting the single default asset when no holding
    /// is determinable.
    pub fn holdings(&self, allocations: &[Allocation]) -> Vec<SmolStr> {
        asset_set(allocations).unwrap_or_else(|error| {
            warn!(%error, asset = DEFAULT_ASSET, "substituting default asset");
            vec![SmolStr::new_static(DEFAULT_ASSET)]
        })
    }

    async fn fetch_sentiments(
        &self,
        context: &AccountContext,
    ) -> (Option<(SourceId, Vec<SentimentScore>)>, Vec<Attempt>) {
        self.query_chain(context.mode, Request::Sentiments, reconcile_sentiments)
            .await
    }

    fn finish_sentiments(
        &self,
        context: &AccountContext,
        fetched: Option<(SourceId, Vec<SentimentScore>)>,
        attempts: Vec<Attempt>,
        assets: &[SmolStr],
    ) -> Resolution<SentimentScore> {
        let covered = fetched.and_then(|(source, scores)| {
            let scores = scores
                .into_iter()
                .filter(|score| assets.contains(&score.asset))
                .collect::<Vec<_>>();

            match scores.is_empty() {
                true => {
                    debug!(%source, "no fetched sentiment covers the asset set");
                    None
                }
                false => Some((source, scores)),
            }
        });

        let resolution = match covered {
            Some((source, scores)) => {
                let (records, backfilled) = backfill_sentiments(scores, assets);
                Resolution {
                    records,
                    source,
                    attempts,
                    backfilled,
                }
            }
            None => Resolution::new(simulate::sentiments(assets), SourceId::Simulated, attempts),
        };

        log_resolution(context, DatasetKind::Sentiments, &resolution);
        resolution
    }

    /// Walk the chain for `request`, returning the first source whose answer survives `accept`
    /// with at least one record. [`SourceId::Simulated`] is left to the caller.
    async fn query_chain<T, F>(
        &self,
        mode: AccountMode,
        request: Request<'_>,
        accept: F,
    ) -> (Option<(SourceId, Vec<T>)>, Vec<Attempt>)
    where
        F: Fn(Vec<RawRecord>) -> Vec<T>,
    {
        let kind = request.kind();
        let mut attempts = Vec::new();

        for source in fallback_chain(mode, kind)
            .into_iter()
            .filter(|source| *source != SourceId::Simulated)
        {
            let result = match self.providers.get(&source) {
                Some(provider) => {
                    match tokio::time::timeout(
                        self.request_timeout,
                        request.dispatch(provider.as_ref()),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(DataError::Timeout {
                            provider: source,
                            timeout: self.request_timeout,
                        }),
                    }
                }
                None => Err(DataError::unavailable(source, "source not configured")),
            };

            let outcome = match result {
                Ok(raw) => {
                    let records = accept(raw);
                    if !records.is_empty() {
                        attempts.push(Attempt {
                            source,
                            outcome: AttemptOutcome::Success(records.len()),
                        });
                        return (Some((source, records)), attempts);
                    }

                    debug!(%kind, %source, "source yielded no usable records");
                    AttemptOutcome::Empty
                }
                Err(error) => {
                    if error.advances_chain() {
                        warn!(%kind, %source, %error, "source failed, falling back");
                    } else {
                        debug!(%kind, %source, %error, "source failed, falling back");
                    }
                    AttemptOutcome::Failed(error)
                }
            };

            attempts.push(Attempt { source, outcome });
        }

        (None, attempts)
    }
}

fn log_resolution<T>(context: &AccountContext, kind: DatasetKind, resolution: &Resolution<T>) {
    info!(
        %kind,
        mode = %context.mode,
        source = %resolution.source,
        records = resolution.records.len(),
        backfilled = resolution.backfilled.len(),
        attempts = resolution.attempts.len(),
        "resolved dataset"
    );
}

/// Distinct determinable assets of `allocations`, in order.
pub fn asset_set(allocations: &[Allocation]) -> Result<Vec<SmolStr>, DataError> {
    let assets = allocations
        .iter()
        .filter(|allocation| allocation.is_determined())
        .map(|allocation| allocation.asset.clone())
        .unique()
        .collect::<Vec<_>>();

    match assets.is_empty() {
        true => Err(DataError::NoAssetsResolved),
        false => Ok(assets),
    }
}

/// Normalise every raw record, dropping and logging the malformed ones.
fn normalise_each<T>(
    raw: Vec<RawRecord>,
    kind: DatasetKind,
    normalise: fn(&RawRecord) -> Result<T, DataError>,
) -> Vec<T> {
    raw.iter()
        .filter_map(|record| match normalise(record) {
            Ok(canonical) => Some(canonical),
            Err(error) => {
                debug!(%kind, %error, "dropping record");
                None
            }
        })
        .collect()
}

/// Canonical allocations from raw portfolio records: compact shapes expanded, undetermined
/// assets dropped, first entry per asset kept.
pub fn reconcile_allocations(raw: Vec<RawRecord>) -> Vec<Allocation> {
    let expanded = raw
        .into_iter()
        .flat_map(|record| normalise::expand_record(record, "percentage"))
        .collect();

    normalise_each(
        expanded,
        DatasetKind::Portfolio,
        normalise::normalise_allocation,
    )
    .into_iter()
    .filter(Allocation::is_determined)
    .unique_by(|allocation| allocation.asset.clone())
    .collect()
}

/// Canonical sentiment scores from raw records, one per determinable asset.
pub fn reconcile_sentiments(raw: Vec<RawRecord>) -> Vec<SentimentScore> {
    let expanded = raw
        .into_iter()
        .flat_map(|record| normalise::expand_record(record, "score"))
        .collect();

    normalise_each(
        expanded,
        DatasetKind::Sentiments,
        normalise::normalise_sentiment,
    )
    .into_iter()
    .filter(SentimentScore::is_determined)
    .unique_by(|score| score.asset.clone())
    .collect()
}

/// Order `scores` by `assets`, generating a score for every asset the source did not cover.
/// Returns the completed set and the assets that were generated.
pub fn backfill_sentiments(
    scores: Vec<SentimentScore>,
    assets: &[SmolStr],
) -> (Vec<SentimentScore>, Vec<SmolStr>) {
    let mut by_asset = scores
        .into_iter()
        .map(|score| (score.asset.clone(), score))
        .collect::<FnvHashMap<_, _>>();

    let mut backfilled = Vec::new();
    let records = assets
        .iter()
        .map(|asset| {
            by_asset.remove(asset).unwrap_or_else(|| {
                debug!(%asset, "backfilling sentiment");
                backfilled.push(asset.clone());
                simulate::sentiment(asset)
            })
        })
        .collect();

    (records, backfilled)
}

/// Canonical history points from raw records that fall inside the `days` day window ending on
/// `today`, one per date, oldest first.
pub fn reconcile_history(raw: Vec<RawRecord>, days: usize, today: NaiveDate) -> Vec<HistoryPoint> {
    let Some(start) = window_start(days, today) else {
        return Vec::new();
    };

    normalise_each(
        raw,
        DatasetKind::SentimentHistory,
        normalise::normalise_history_point,
    )
    .into_iter()
    .filter(|point| point.date >= start && point.date <= today)
    .unique_by(|point| point.date)
    .sorted_by_key(|point| point.date)
    .collect()
}

/// Complete `points` to exactly one point per day of the window, generating the missing days.
/// Returns the completed series and the ISO dates that were generated.
pub fn backfill_history(
    asset: &str,
    points: Vec<HistoryPoint>,
    days: usize,
    today: NaiveDate,
) -> (Vec<HistoryPoint>, Vec<SmolStr>) {
    let Some(start) = window_start(days, today) else {
        return (Vec::new(), Vec::new());
    };

    let mut by_date = points
        .into_iter()
        .map(|point| (point.date, point))
        .collect::<FnvHashMap<_, _>>();

    let mut rng = rand::rng();
    let mut backfilled = Vec::new();

    let points = (0..days)
        .map_while(|offset| {
            let date = start.checked_add_days(Days::new(offset as u64))?;
            Some(by_date.remove(&date).unwrap_or_else(|| {
                backfilled.push(SmolStr::new(date.to_string()));
                simulate::history_point_with(asset, date, &mut rng)
            }))
        })
        .collect();

    (points, backfilled)
}

/// Canonical trades from raw records: filtered to `query.asset`, newest first, one per
/// transaction hash, at most `query.limit`.
pub fn reconcile_trades(raw: Vec<RawRecord>, query: &TradeQuery) -> Vec<TradeRecord> {
    let mut seen = FnvHashSet::default();

    normalise_each(raw, DatasetKind::Trades, normalise::normalise_trade)
        .into_iter()
        .filter(|trade| match &query.asset {
            Some(asset) => trade.asset.eq_ignore_ascii_case(asset),
            None => true,
        })
        .sorted_by(|a, b| b.timestamp.cmp(&a.timestamp))
        .filter(|trade| match &trade.tx_hash {
            Some(hash) => seen.insert(hash.clone()),
            None => true,
        })
        .take(query.limit)
        .collect()
}

/// First day of the `days` day window ending on `today`. `None` for an empty window or one
/// reaching past the representable calendar.
fn window_start(days: usize, today: NaiveDate) -> Option<NaiveDate> {
    let span = days.checked_sub(1)?;
    today.checked_sub_days(Days::new(span as u64))
}

impl Resolution<HistoryPoint> {
    /// Label a resolved history with its asset.
    pub fn into_series(self, asset: impl Into<SmolStr>) -> HistorySeries {
        HistorySeries {
            asset: asset.into(),
            points: self.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountState;
    use async_trait::async_trait;
    use serde_json::json;

    /// Provider answering every operation with the same canned result.
    struct CannedProvider {
        id: SourceId,
        answer: Result<Vec<RawRecord>, DataError>,
    }

    #[async_trait]
    impl SourceProvider for CannedProvider {
        fn id(&self) -> SourceId {
            self.id
        }

        async fn fetch_portfolio(&self, _: Option<&str>) -> Result<Vec<RawRecord>, DataError> {
            self.answer.clone()
        }

        async fn fetch_sentiments(&self) -> Result<Vec<RawRecord>, DataError> {
            self.answer.clone()
        }

        async fn fetch_sentiment_history(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<RawRecord>, DataError> {
            self.answer.clone()
        }

        async fn fetch_trades(
            &self,
            _: Option<&str>,
            _: &TradeQuery,
        ) -> Result<Vec<RawRecord>, DataError> {
            self.answer.clone()
        }
    }

    fn canned(id: SourceId, answer: Result<Vec<RawRecord>, DataError>) -> Arc<dyn SourceProvider> {
        Arc::new(CannedProvider { id, answer })
    }

    fn default_assets() -> Vec<SmolStr> {
        ["BTC", "ETH", "NEAR", "SOL"]
            .into_iter()
            .map(SmolStr::new)
            .collect()
    }

    fn resolver() -> FallbackResolver {
        FallbackResolver::new(Duration::from_secs(1), default_assets())
    }

    fn context(state: AccountState) -> AccountContext {
        AccountContext::new(&state, &[SmolStr::new("sweetowl8091.testnet")])
    }

    #[test]
    fn test_fallback_chain() {
        use SourceId::*;

        struct TestCase {
            mode: AccountMode,
            kind: DatasetKind,
            expected: Vec<SourceId>,
        }

        let tests = vec![
            TestCase {
                // TC0
                mode: AccountMode::Demo,
                kind: DatasetKind::Portfolio,
                expected: vec![Demo, Simulated],
            },
            TestCase {
                // TC1
                mode: AccountMode::Demo,
                kind: DatasetKind::SentimentHistory,
                expected: vec![Demo, Simulated],
            },
            TestCase {
                // TC2
                mode: AccountMode::ContractIdentified,
                kind: DatasetKind::Trades,
                expected: vec![Contract, Api, Simulated],
            },
            TestCase {
                // TC3
                mode: AccountMode::AuthenticatedGeneric,
                kind: DatasetKind::Portfolio,
                expected: vec![Contract, Api, Simulated],
            },
            TestCase {
                // TC4: sentiment is market-wide for signed in accounts
                mode: AccountMode::ContractIdentified,
                kind: DatasetKind::Sentiments,
                expected: vec![Api, Simulated],
            },
            TestCase {
                // TC5
                mode: AccountMode::Anonymous,
                kind: DatasetKind::Trades,
                expected: vec![Api, Simulated],
            },
            TestCase {
                // TC6
                mode: AccountMode::Anonymous,
                kind: DatasetKind::SentimentHistory,
                expected: vec![Api, Simulated],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = fallback_chain(test.mode, test.kind);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        for mode in [
            AccountMode::Demo,
            AccountMode::ContractIdentified,
            AccountMode::AuthenticatedGeneric,
            AccountMode::Anonymous,
        ] {
            for kind in [
                DatasetKind::Portfolio,
                DatasetKind::Sentiments,
                DatasetKind::SentimentHistory,
                DatasetKind::Trades,
            ] {
                assert_eq!(fallback_chain(mode, kind).last(), Some(&Simulated));
            }
        }
    }

    #[test]
    fn test_reconcile_allocations() {
        let raw = vec![
            json!({"symbol": "btc", "allocation": 35, "percentage": 35}),
            json!({"percentage": 25}),
            json!("garbage"),
            json!({"crypto": "BTC", "percentage": 10}),
            json!({"NEAR": 20, "SOL": "15"}),
        ];

        let actual = reconcile_allocations(raw);

        assert_eq!(
            actual,
            vec![
                Allocation::new("BTC", 35.0),
                Allocation::new("NEAR", 20.0),
                Allocation::new("SOL", 15.0),
            ]
        );
    }

    #[test]
    fn test_asset_set() {
        struct TestCase {
            input: Vec<Allocation>,
            expected: Result<Vec<SmolStr>, DataError>,
        }

        let tests = vec![
            TestCase {
                // TC0
                input: vec![Allocation::new("ETH", 60.0), Allocation::new("BTC", 40.0)],
                expected: Ok(vec![SmolStr::new("ETH"), SmolStr::new("BTC")]),
            },
            TestCase {
                // TC1: only undetermined holdings
                input: vec![Allocation::new("Unknown", 100.0)],
                expected: Err(DataError::NoAssetsResolved),
            },
            TestCase {
                // TC2
                input: vec![],
                expected: Err(DataError::NoAssetsResolved),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = asset_set(&test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        assert_eq!(resolver().holdings(&[]), vec![SmolStr::new("BTC")]);
    }

    #[test]
    fn test_backfill_sentiments_follows_asset_order() {
        let assets = default_assets();
        let fetched = vec![
            SentimentScore::new("SOL", -0.25, -0.35),
            SentimentScore::new("BTC", 0.78, 0.13),
        ];

        let (actual, backfilled) = backfill_sentiments(fetched, &assets);

        assert_eq!(
            actual.iter().map(|score| score.asset.as_str()).collect::<Vec<_>>(),
            vec!["BTC", "ETH", "NEAR", "SOL"]
        );
        assert_eq!(actual[0], SentimentScore::new("BTC", 0.78, 0.13));
        assert_eq!(actual[3], SentimentScore::new("SOL", -0.25, -0.35));
        assert_eq!(backfilled, vec![SmolStr::new("ETH"), SmolStr::new("NEAR")]);
    }

    #[test]
    fn test_reconcile_and_backfill_history() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let raw = vec![
            json!({"date": "2024-03-07", "score": 0.78}),
            json!({"date": "2024-03-05", "score": 0.70}),
            json!({"date": "2024-03-05", "score": 0.10}),
            json!({"date": "2024-02-01", "score": 0.50}),
            json!({"date": "Mar 6", "score": 0.65}),
        ];

        let points = reconcile_history(raw, 3, today);
        assert_eq!(
            points,
            vec![
                HistoryPoint::new(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(), 0.70),
                HistoryPoint::new(today, 0.78),
            ]
        );

        let (actual, backfilled) = backfill_history("BTC", points, 3, today);
        assert_eq!(actual.len(), 3);
        assert_eq!(actual[0].score, 0.70);
        assert_eq!(actual[1].date, NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
        assert_eq!(actual[2].score, 0.78);
        assert_eq!(backfilled, vec![SmolStr::new("2024-03-06")]);

        assert!(reconcile_history(vec![json!({"date": "2024-03-07"})], 0, today).is_empty());
    }

    #[test]
    fn test_window_start() {
        struct TestCase {
            input: usize,
            expected: Option<NaiveDate>,
        }

        let today = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();

        let tests = vec![
            TestCase {
                // TC0
                input: 7,
                expected: NaiveDate::from_ymd_opt(2024, 3, 1),
            },
            TestCase {
                // TC1: single day window
                input: 1,
                expected: Some(today),
            },
            TestCase {
                // TC2: empty window
                input: 0,
                expected: None,
            },
            TestCase {
                // TC3: window past the representable calendar
                input: 100_000_000_000,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = window_start(test.input, today);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        let raw = vec![json!({"date": "2024-03-07"})];
        assert!(reconcile_history(raw, 100_000_000_000, today).is_empty());
        assert_eq!(backfill_history("BTC", vec![], 100_000_000_000, today), (vec![], vec![]));
    }

    #[test]
    fn test_reconcile_trades() {
        let raw = vec![
            json!({"timestamp": "2023-12-04T09:12:45Z", "type": "buy", "asset": "ETH", "amount": "1.2", "txHash": "a"}),
            json!({"timestamp": "2023-12-05T15:32:11Z", "type": "buy", "asset": "BTC", "amount": "0.05", "txHash": "b"}),
            json!({"timestamp": "2023-12-05T15:32:11Z", "type": "buy", "asset": "BTC", "amount": "0.05", "txHash": "b"}),
            json!({"type": "sell", "asset": "SOL", "amount": "12.5"}),
            json!({"timestamp": "2023-12-05T14:21:03Z", "type": "SELL", "asset": "SOL", "amount": "12.5"}),
        ];

        let actual = reconcile_trades(raw.clone(), &TradeQuery::default());
        assert_eq!(
            actual.iter().map(|trade| trade.asset.as_str()).collect::<Vec<_>>(),
            vec!["BTC", "SOL", "ETH"]
        );

        let actual = reconcile_trades(raw.clone(), &TradeQuery::new(1));
        assert_eq!(actual.len(), 1);
        assert_eq!(actual[0].asset, "BTC");

        let actual = reconcile_trades(raw, &TradeQuery::new(10).with_asset("sol"));
        assert_eq!(actual.len(), 1);
        assert_eq!(actual[0].amount, 12.5);
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success() {
        let resolver = resolver()
            .with_provider(canned(
                SourceId::Contract,
                Err(DataError::unavailable(SourceId::Contract, "CodeDoesNotExist")),
            ))
            .with_provider(canned(
                SourceId::Api,
                Ok(vec![json!({"asset": "ETH", "percentage": 100})]),
            ));

        let actual = resolver
            .resolve_portfolio(&context(AccountState::signed_in("alice.testnet")))
            .await;

        assert_eq!(actual.source, SourceId::Api);
        assert_eq!(actual.records, vec![Allocation::new("ETH", 100.0)]);
        assert_eq!(
            actual.attempts,
            vec![
                Attempt {
                    source: SourceId::Contract,
                    outcome: AttemptOutcome::Failed(DataError::unavailable(
                        SourceId::Contract,
                        "CodeDoesNotExist"
                    )),
                },
                Attempt {
                    source: SourceId::Api,
                    outcome: AttemptOutcome::Success(1),
                },
            ]
        );
        assert!(!actual.is_synthetic());
    }

    #[tokio::test]
    async fn test_empty_and_undetermined_answers_advance_chain() {
        let resolver = resolver()
            .with_provider(canned(
                SourceId::Contract,
                Ok(vec![json!({"percentage": 100})]),
            ))
            .with_provider(canned(SourceId::Api, Ok(vec![])));

        let actual = resolver
            .resolve_portfolio(&context(AccountState::signed_in("sweetowl8091.testnet")))
            .await;

        assert_eq!(actual.source, SourceId::Simulated);
        assert_eq!(actual.records, simulate::portfolio(&default_assets()));
        assert_eq!(
            actual
                .attempts
                .iter()
                .map(|attempt| attempt.outcome.clone())
                .collect::<Vec<_>>(),
            vec![AttemptOutcome::Empty, AttemptOutcome::Empty]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_source_fails_over() {
        let actual = resolver()
            .resolve_trades(
                &context(AccountState::signed_in("alice.testnet")),
                &TradeQuery::new(4),
            )
            .await;

        assert_eq!(actual.source, SourceId::Simulated);
        assert_eq!(actual.records.len(), 4);
        assert_eq!(actual.attempts.len(), 2);
        assert!(
            actual
                .attempts
                .iter()
                .all(|attempt| matches!(attempt.outcome, AttemptOutcome::Failed(_)))
        );
    }

    /// Provider that never answers within any reasonable timeout.
    struct StalledProvider;

    #[async_trait]
    impl SourceProvider for StalledProvider {
        fn id(&self) -> SourceId {
            SourceId::Api
        }

        async fn fetch_portfolio(&self, _: Option<&str>) -> Result<Vec<RawRecord>, DataError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }

        async fn fetch_sentiments(&self) -> Result<Vec<RawRecord>, DataError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }

        async fn fetch_sentiment_history(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<RawRecord>, DataError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }

        async fn fetch_trades(
            &self,
            _: Option<&str>,
            _: &TradeQuery,
        ) -> Result<Vec<RawRecord>, DataError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_stalled_source_times_out() {
        let resolver = FallbackResolver::new(Duration::from_millis(50), default_assets())
            .with_provider(Arc::new(StalledProvider));

        let actual = resolver
            .resolve_sentiments(&context(AccountState::anonymous()), &default_assets())
            .await;

        assert_eq!(actual.source, SourceId::Simulated);
        assert_eq!(
            actual.attempts,
            vec![Attempt {
                source: SourceId::Api,
                outcome: AttemptOutcome::Failed(DataError::Timeout {
                    provider: SourceId::Api,
                    timeout: Duration::from_millis(50),
                }),
            }]
        );
    }

    #[tokio::test]
    async fn test_sentiments_backfill_missing_holdings() {
        let resolver = resolver().with_provider(canned(
            SourceId::Api,
            Ok(vec![
                json!({"symbol": "BTC", "score": 0.78, "change": 0.13}),
                json!({"symbol": "DOT", "score": 0.45, "change": 0.05}),
            ]),
        ));

        let assets = vec![SmolStr::new("BTC"), SmolStr::new("NEAR")];
        let actual = resolver
            .resolve_sentiments(&context(AccountState::anonymous()), &assets)
            .await;

        assert_eq!(actual.source, SourceId::Api);
        assert_eq!(actual.records.len(), 2);
        assert_eq!(actual.records[0], SentimentScore::new("BTC", 0.78, 0.13));
        assert_eq!(actual.records[1].asset, "NEAR");
        assert_eq!(actual.backfilled, vec![SmolStr::new("NEAR")]);
        assert!(actual.is_synthetic());
    }

    #[tokio::test]
    async fn test_oversized_history_window_is_capped() {
        let config = DashboardConfig::from_lookup(|key| {
            (key == "HISTORY_DAYS").then(|| "100000000".to_string())
        });
        let today = Utc::now().date_naive();
        let resolver = resolver().with_provider(canned(
            SourceId::Api,
            Ok(vec![json!({"date": today.to_string(), "score": 0.5})]),
        ));

        let actual = resolver
            .resolve_history(&context(AccountState::anonymous()), "BTC", config.history_days)
            .await;
        assert_eq!(actual.records.len(), MAX_HISTORY_DAYS);

        let actual = resolver
            .resolve_history(&context(AccountState::anonymous()), "BTC", 100_000_000)
            .await;
        assert_eq!(actual.records.len(), MAX_HISTORY_DAYS);
    }

    #[tokio::test]
    async fn test_history_is_exactly_n_days_from_partial_source() {
        let today = Utc::now().date_naive();
        let resolver = resolver().with_provider(canned(
            SourceId::Api,
            Ok(vec![json!({"date": today.to_string(), "score": 0.5})]),
        ));

        let actual = resolver
            .resolve_history(&context(AccountState::anonymous()), "NEAR", 7)
            .await;

        // A midnight rollover between building the answer and resolving it falls back instead
        if actual.source == SourceId::Api {
            assert_eq!(actual.backfilled.len(), 6);
            assert_eq!(actual.records.last().unwrap().score, 0.5);
        }
        assert_eq!(actual.records.len(), 7);
        assert!(
            actual
                .records
                .windows(2)
                .all(|pair| pair[0].date < pair[1].date)
        );
    }
}
