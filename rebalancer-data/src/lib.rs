//! # Rebalancer-Data
//! Portfolio, sentiment and trade data for the rebalancing dashboard, reconciled across a NEAR
//! contract, a REST backend and a simulated data generator.
//!
//! The library provides:
//! - A canonical record schema every source is normalised into.
//! - [`SourceProvider`] implementations for the contract, the REST backend and the demo wallet.
//! - A [`FallbackResolver`] walking an explicit source chain per dataset kind and account mode,
//!   always ending in simulated data.
//! - A [`ReconciliationSession`] caching the last good result sets, discarding stale
//!   resolutions and broadcasting "refreshed" notifications.

/// Account identity and the derived account mode.
pub mod account;

/// Environment driven configuration.
pub mod config;

/// All errors generated in `rebalancer-data`.
pub mod error;

/// Canonical record schema.
pub mod model;

/// Field resolution and coercion from source shaped records into canonical records.
pub mod normalise;

/// Contract, REST and demo data sources.
pub mod provider;

/// Ordered source fallback per dataset kind and account mode.
pub mod resolver;

/// Cached, tagged result sets for the presentation layer.
pub mod session;

/// Deterministic base signal plus bounded noise data generator.
pub mod simulate;

pub use account::{AccountContext, AccountMode, AccountState};
pub use config::DashboardConfig;
pub use error::DataError;
pub use model::{
    Allocation, DatasetKind, HistoryPoint, HistorySeries, SentimentScore, SentimentStatus,
    TradeKind, TradeRecord,
};
pub use provider::{SourceId, SourceProvider, TradeQuery};
pub use resolver::{Attempt, AttemptOutcome, FallbackResolver, Resolution};
pub use session::{DashboardSnapshot, ReconciliationSession};
