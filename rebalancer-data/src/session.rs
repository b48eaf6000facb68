//! Reconciliation session.
//!
//! Owns the last-known-good canonical result sets and the selected asset, and re-runs the
//! [`FallbackResolver`] when the account or the selection changes. Readers are served from the
//! cache at all times; a refresh replaces one dataset at a time, atomically, once its resolution
//! completes.
//!
//! Every resolution is tagged with the account epoch (and, for history, the selection counter)
//! it was issued under. A result whose tag no longer matches the session is discarded.

use crate::{
    account::{AccountContext, AccountMode, AccountState},
    config::DashboardConfig,
    model::{
        Allocation, DEFAULT_ASSET, DatasetKind, HistoryPoint, HistorySeries, SentimentScore,
        TradeRecord,
    },
    provider::{SourceId, TradeQuery},
    resolver::{DashboardResolution, FallbackResolver, Resolution},
};
use parking_lot::RwLock;
use serde::Serialize;
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the "refreshed" notification channel.
const REFRESHED_CAPACITY: usize = 64;

/// Tag carried by an in-flight history resolution.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct HistoryTag {
    epoch: u64,
    selection: u64,
}

#[derive(Debug, Clone)]
struct CachedHistory {
    asset: SmolStr,
    resolution: Resolution<HistoryPoint>,
}

#[derive(Debug, Default)]
struct Cache {
    portfolio: Option<Arc<Resolution<Allocation>>>,
    sentiments: Option<Arc<Resolution<SentimentScore>>>,
    history: Option<Arc<CachedHistory>>,
    trades: Option<Arc<Resolution<TradeRecord>>>,
}

#[derive(Debug)]
struct SessionState {
    account: AccountState,
    context: AccountContext,
    /// Bumped on every account change.
    epoch: u64,
    selected: Option<SmolStr>,
    /// Bumped on every change of `selected`.
    selection: u64,
    cache: Cache,
}

/// Source of each published dataset, `None` until the dataset is first resolved.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct DatasetSources {
    pub portfolio: Option<SourceId>,
    pub sentiments: Option<SourceId>,
    pub history: Option<SourceId>,
    pub trades: Option<SourceId>,
}

/// Everything the presentation layer renders, read from the cache in one go.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub mode: AccountMode,
    pub account_id: Option<SmolStr>,
    pub selected_asset: Option<SmolStr>,
    pub allocations: Vec<Allocation>,
    pub sentiments: Vec<SentimentScore>,
    pub history: Option<HistorySeries>,
    pub trades: Vec<TradeRecord>,
    pub sources: DatasetSources,
    pub simulated: bool,
}

impl DashboardSnapshot {
    /// Mode indicator: true when any displayed data is demo or simulated rather than real.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }
}

/// Reconciliation session for one dashboard.
#[derive(Debug)]
pub struct ReconciliationSession {
    resolver: FallbackResolver,
    identified: Vec<SmolStr>,
    history_days: usize,
    trade_limit: usize,
    state: RwLock<SessionState>,
    refreshed: broadcast::Sender<DatasetKind>,
}

impl ReconciliationSession {
    pub fn new(resolver: FallbackResolver, config: &DashboardConfig, account: AccountState) -> Self {
        let context = AccountContext::new(&account, &config.identified_accounts);
        let (refreshed, _) = broadcast::channel(REFRESHED_CAPACITY);

        Self {
            resolver,
            identified: config.identified_accounts.clone(),
            history_days: config.history_days,
            trade_limit: config.trade_limit,
            state: RwLock::new(SessionState {
                account,
                context,
                epoch: 0,
                selected: None,
                selection: 0,
                cache: Cache::default(),
            }),
            refreshed,
        }
    }

    /// Construct a session whose resolver is wired from `config`.
    pub fn from_config(config: &DashboardConfig, account: AccountState) -> Self {
        Self::new(FallbackResolver::from_config(config), config, account)
    }

    /// Subscribe to "refreshed" notifications, one per published dataset.
    pub fn subscribe(&self) -> broadcast::Receiver<DatasetKind> {
        self.refreshed.subscribe()
    }

    pub fn mode(&self) -> AccountMode {
        self.state.read().context.mode
    }

    pub fn account(&self) -> AccountState {
        self.state.read().account.clone()
    }

    pub fn selected_asset(&self) -> Option<SmolStr> {
        self.state.read().selected.clone()
    }

    /// Apply a new account state from the wallet/session collaborator and re-resolve every
    /// dataset for it.
    ///
    /// Any resolution still in flight for the previous account is discarded when it lands. The
    /// previous account's data stays visible until each dataset is replaced. Returns false, and
    /// resolves nothing, when the state is unchanged.
    pub async fn set_account(&self, account: AccountState) -> bool {
        {
            let mut state = self.state.write();
            if state.account == account {
                return false;
            }

            let context = AccountContext::new(&account, &self.identified);
            info!(
                previous = %state.context.mode,
                mode = %context.mode,
                account = ?account.account_id,
                "account changed"
            );

            state.account = account;
            state.context = context;
            state.epoch += 1;
        }

        self.refresh().await;
        true
    }

    /// Re-resolve every dataset for the current account.
    ///
    /// Portfolio, trades and sentiment resolve concurrently; sentiment history follows for the
    /// selected asset, which is kept if still present in the new sentiment set and otherwise
    /// reset to its first asset.
    pub async fn refresh(&self) {
        let (epoch, context) = {
            let state = self.state.read();
            (state.epoch, state.context.clone())
        };

        let DashboardResolution {
            portfolio,
            sentiments,
            trades,
        } = self
            .resolver
            .resolve_dashboard(&context, &TradeQuery::new(self.trade_limit))
            .await;

        let assets = sentiments
            .records
            .iter()
            .map(|score| score.asset.clone())
            .collect::<Vec<_>>();

        self.publish(epoch, DatasetKind::Portfolio, |cache| {
            cache.portfolio = Some(Arc::new(portfolio))
        });
        self.publish(epoch, DatasetKind::Trades, |cache| {
            cache.trades = Some(Arc::new(trades))
        });
        self.publish(epoch, DatasetKind::Sentiments, |cache| {
            cache.sentiments = Some(Arc::new(sentiments))
        });

        let issued = {
            let mut state = self.state.write();
            match state.epoch == epoch {
                true => {
                    let asset = match &state.selected {
                        Some(selected) if assets.contains(selected) => selected.clone(),
                        _ => assets
                            .first()
                            .cloned()
                            .unwrap_or_else(|| SmolStr::new_static(DEFAULT_ASSET)),
                    };

                    if state.selected.as_ref() != Some(&asset) {
                        debug!(%asset, "defaulting selected asset");
                        state.selected = Some(asset.clone());
                        state.selection += 1;
                    }

                    let tag = HistoryTag {
                        epoch,
                        selection: state.selection,
                    };
                    Some((tag, asset))
                }
                false => None,
            }
        };

        if let Some((tag, asset)) = issued {
            self.resolve_history(tag, context, asset).await;
        }
    }

    /// Select the asset whose sentiment history is displayed and re-resolve only that history.
    pub async fn select_asset(&self, asset: &str) {
        let asset = SmolStr::new(asset.trim().to_ascii_uppercase());

        let (tag, context) = {
            let mut state = self.state.write();
            state.selected = Some(asset.clone());
            state.selection += 1;

            let tag = HistoryTag {
                epoch: state.epoch,
                selection: state.selection,
            };
            (tag, state.context.clone())
        };

        self.resolve_history(tag, context, asset).await;
    }

    async fn resolve_history(&self, tag: HistoryTag, context: AccountContext, asset: SmolStr) {
        let resolution = self
            .resolver
            .resolve_history(&context, &asset, self.history_days)
            .await;

        let applied = {
            let mut state = self.state.write();
            let current = HistoryTag {
                epoch: state.epoch,
                selection: state.selection,
            };

            match current == tag {
                true => {
                    state.cache.history = Some(Arc::new(CachedHistory {
                        asset: asset.clone(),
                        resolution,
                    }));
                    true
                }
                false => false,
            }
        };

        match applied {
            true => self.notify(DatasetKind::SentimentHistory),
            false => debug!(%asset, ?tag, "discarding stale sentiment history"),
        }
    }

    /// Replace one cached dataset if `epoch` is still current.
    fn publish<F>(&self, epoch: u64, kind: DatasetKind, update: F)
    where
        F: FnOnce(&mut Cache),
    {
        let applied = {
            let mut state = self.state.write();
            match state.epoch == epoch {
                true => {
                    update(&mut state.cache);
                    true
                }
                false => false,
            }
        };

        match applied {
            true => self.notify(kind),
            false => debug!(%kind, epoch, "discarding stale resolution"),
        }
    }

    fn notify(&self, kind: DatasetKind) {
        // No subscribers is fine
        let _ = self.refreshed.send(kind);
    }

    /// Latest portfolio allocations. Empty until the first refresh completes.
    pub fn allocations(&self) -> Vec<Allocation> {
        self.state
            .read()
            .cache
            .portfolio
            .as_ref()
            .map(|resolution| resolution.records.clone())
            .unwrap_or_default()
    }

    /// Latest sentiment scores, one per held asset in portfolio order.
    pub fn sentiments(&self) -> Vec<SentimentScore> {
        self.state
            .read()
            .cache
            .sentiments
            .as_ref()
            .map(|resolution| resolution.records.clone())
            .unwrap_or_default()
    }

    /// Latest sentiment history, if the cached series belongs to `asset`.
    pub fn sentiment_history(&self, asset: &str) -> Option<HistorySeries> {
        self.state
            .read()
            .cache
            .history
            .as_ref()
            .filter(|cached| cached.asset.eq_ignore_ascii_case(asset.trim()))
            .map(|cached| cached.resolution.clone().into_series(cached.asset.clone()))
    }

    /// Latest trades, newest first, at most `limit`.
    pub fn trades(&self, limit: usize) -> Vec<TradeRecord> {
        self.state
            .read()
            .cache
            .trades
            .as_ref()
            .map(|resolution| resolution.records.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Read every dataset plus the mode indicator under a single lock acquisition.
    pub fn snapshot(&self) -> DashboardSnapshot {
        let state = self.state.read();
        let cache = &state.cache;

        let sources = DatasetSources {
            portfolio: cache.portfolio.as_ref().map(|resolution| resolution.source),
            sentiments: cache.sentiments.as_ref().map(|resolution| resolution.source),
            history: cache.history.as_ref().map(|cached| cached.resolution.source),
            trades: cache.trades.as_ref().map(|resolution| resolution.source),
        };

        let simulated = state.context.mode == AccountMode::Demo
            || cache
                .portfolio
                .as_ref()
                .is_some_and(|resolution| resolution.is_synthetic())
            || cache
                .sentiments
                .as_ref()
                .is_some_and(|resolution| resolution.is_synthetic())
            || cache
                .history
                .as_ref()
                .is_some_and(|cached| cached.resolution.is_synthetic())
            || cache
                .trades
                .as_ref()
                .is_some_and(|resolution| resolution.is_synthetic());

        DashboardSnapshot {
            mode: state.context.mode,
            account_id: state.account.account_id.clone(),
            selected_asset: state.selected.clone(),
            allocations: cache
                .portfolio
                .as_ref()
                .map(|resolution| resolution.records.clone())
                .unwrap_or_default(),
            sentiments: cache
                .sentiments
                .as_ref()
                .map(|resolution| resolution.records.clone())
                .unwrap_or_default(),
            history: cache
                .history
                .as_ref()
                .map(|cached| cached.resolution.clone().into_series(cached.asset.clone())),
            trades: cache
                .trades
                .as_ref()
                .map(|resolution| resolution.records.clone())
                .unwrap_or_default(),
            sources,
            simulated,
        }
    }
}
