use crate::{
    model::DEFAULT_ASSETS,
    provider::{DEFAULT_TRADE_LIMIT, api::DEFAULT_API_URL, contract::DEFAULT_RPC_URL},
};
use smol_str::SmolStr;
use std::{str::FromStr, time::Duration};

/// Default number of days of sentiment history resolved for the selected asset.
pub const DEFAULT_HISTORY_DAYS: usize = 7;

/// Largest sentiment history window resolved, in days.
pub const MAX_HISTORY_DAYS: usize = 365;

/// Default bound on a single provider call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconciliation configuration.
///
/// Built with [`DashboardConfig::from_env`] or from [`Default`] plus the `with_*` builders.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// NEAR JSON-RPC endpoint used by the contract provider
    pub rpc_url: String,
    /// Deployed contract account. `None` means no contract is deployed
    pub contract_id: Option<SmolStr>,
    /// Accounts wired to real data through the contract
    pub identified_accounts: Vec<SmolStr>,
    /// Base URL of the REST backend
    pub api_url: String,
    /// Days of sentiment history per resolution
    pub history_days: usize,
    /// Trades requested per resolution
    pub trade_limit: usize,
    /// Upper bound on each provider call
    pub request_timeout: Duration,
    /// Asset universe used when no portfolio resolves
    pub default_assets: Vec<SmolStr>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            contract_id: None,
            identified_accounts: Vec::new(),
            api_url: DEFAULT_API_URL.to_string(),
            history_days: DEFAULT_HISTORY_DAYS,
            trade_limit: DEFAULT_TRADE_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_assets: DEFAULT_ASSETS.into_iter().map(SmolStr::new_static).collect(),
        }
    }
}

impl DashboardConfig {
    /// Read configuration from the process environment, falling back to defaults for anything
    /// unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse = |key: &str| lookup(key).map(|value| value.trim().to_string());

        Self {
            rpc_url: parse("NEAR_RPC_URL")
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.rpc_url),
            contract_id: parse("NEAR_CONTRACT_ID")
                .filter(|value| !value.is_empty())
                .map(SmolStr::from),
            identified_accounts: parse("NEAR_IDENTIFIED_ACCOUNTS")
                .map(|value| split_list(&value, false))
                .unwrap_or(defaults.identified_accounts),
            api_url: parse("DASHBOARD_API_URL")
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_url),
            history_days: parse_positive(lookup("HISTORY_DAYS"))
                .map(|days: usize| days.min(MAX_HISTORY_DAYS))
                .unwrap_or(defaults.history_days),
            trade_limit: parse_positive(lookup("TRADE_LIMIT")).unwrap_or(defaults.trade_limit),
            request_timeout: parse_positive(lookup("REQUEST_TIMEOUT_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            default_assets: parse("DEFAULT_ASSETS")
                .map(|value| split_list(&value, true))
                .filter(|assets| !assets.is_empty())
                .unwrap_or(defaults.default_assets),
        }
    }

    /// Set the deployed contract account
    pub fn with_contract_id(mut self, contract_id: impl Into<SmolStr>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    /// Set the accounts that qualify as contract identified
    pub fn with_identified_accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.identified_accounts = accounts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the NEAR JSON-RPC endpoint
    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    /// Set the REST backend base URL
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Set the sentiment history day count, capped at [`MAX_HISTORY_DAYS`]
    pub fn with_history_days(mut self, days: usize) -> Self {
        self.history_days = days.min(MAX_HISTORY_DAYS);
        self
    }

    /// Set the trade limit
    pub fn with_trade_limit(mut self, limit: usize) -> Self {
        self.trade_limit = limit;
        self
    }

    /// Set the per-provider request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the default asset universe
    pub fn with_default_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.default_assets = assets.into_iter().map(Into::into).collect();
        self
    }
}

fn parse_positive<T>(value: Option<String>) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    value
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

fn split_list(value: &str, uppercase: bool) -> Vec<SmolStr> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match uppercase {
            true => SmolStr::new(item.to_ascii_uppercase()),
            false => SmolStr::new(item),
        })
        .collect()
}
