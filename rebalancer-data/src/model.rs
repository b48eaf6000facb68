//! Canonical record schema shared by the resolver, the session and the presentation layer.
//!
//! Every source, whatever shape it answers in, is normalised into these types before it is
//! published.

use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Sentinel asset label for a record whose asset could not be determined.
pub const UNKNOWN_ASSET: &str = "Unknown";

/// Single asset substituted when an account resolves to zero determinable holdings.
pub const DEFAULT_ASSET: &str = "BTC";

/// Asset universe used when no source yields a portfolio.
pub const DEFAULT_ASSETS: [&str; 4] = ["BTC", "ETH", "NEAR", "SOL"];

/// Dataset kinds the resolver knows how to source.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    #[display("portfolio")]
    Portfolio,
    #[display("sentiment")]
    Sentiments,
    #[display("sentiment_history")]
    SentimentHistory,
    #[display("trades")]
    Trades,
}

/// Normalised portfolio allocation entry.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Allocation {
    /// Uppercase ticker, unique within a result set.
    pub asset: SmolStr,
    /// Share of the portfolio in `[0, 100]`. Sets need not sum to exactly 100.
    pub percentage: f64,
}

impl Allocation {
    pub fn new(asset: impl Into<SmolStr>, percentage: f64) -> Self {
        Self {
            asset: asset.into(),
            percentage,
        }
    }

    pub fn is_determined(&self) -> bool {
        is_determined(&self.asset)
    }
}

/// Normalised market-wide sentiment score for one asset.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct SentimentScore {
    pub asset: SmolStr,
    /// Score in `[-1, 1]`.
    pub score: f64,
    /// Signed, unbounded change since the previous reading.
    pub change: f64,
}

impl SentimentScore {
    pub fn new(asset: impl Into<SmolStr>, score: f64, change: f64) -> Self {
        Self {
            asset: asset.into(),
            score,
            change,
        }
    }

    pub fn is_determined(&self) -> bool {
        is_determined(&self.asset)
    }

    pub fn status(&self) -> SentimentStatus {
        SentimentStatus::from_score(self.score)
    }
}

/// One day of sentiment history.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    /// Score in `[-1, 1]`.
    pub score: f64,
}

impl HistoryPoint {
    pub fn new(date: NaiveDate, score: f64) -> Self {
        Self { date, score }
    }

    pub fn status(&self) -> SentimentStatus {
        SentimentStatus::from_score(self.score)
    }
}

/// Sentiment history for a single asset, ordered oldest to newest with one point per day.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HistorySeries {
    pub asset: SmolStr,
    pub points: Vec<HistoryPoint>,
}

impl HistorySeries {
    /// Most recent score, or neutral for an empty series.
    pub fn current(&self) -> f64 {
        self.points.last().map(|point| point.score).unwrap_or(0.0)
    }

    /// Score movement across the whole window (newest minus oldest).
    pub fn change(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() >= 2 => last.score - first.score,
            _ => 0.0,
        }
    }
}

/// Trade, transfer or account action kinds a trade history entry can carry.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
    #[display("swap")]
    Swap,
    #[display("exchange")]
    Exchange,
    #[display("transfer")]
    Transfer,
    #[display("receive")]
    Receive,
    #[display("send")]
    Send,
    #[display("key")]
    Key,
    #[display("deploy")]
    Deploy,
    #[display("storage")]
    Storage,
    #[display("other")]
    Other,
}

impl TradeKind {
    /// Case-insensitive parse of a source trade label; anything unrecognised maps to
    /// [`TradeKind::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "buy" => TradeKind::Buy,
            "sell" => TradeKind::Sell,
            "swap" => TradeKind::Swap,
            "exchange" => TradeKind::Exchange,
            "transfer" => TradeKind::Transfer,
            "receive" | "received" | "deposit" => TradeKind::Receive,
            "send" | "sent" | "withdraw" => TradeKind::Send,
            "key" | "addkey" | "add_key" | "deletekey" | "delete_key" => TradeKind::Key,
            "deploy" | "deploycontract" | "deploy_contract" => TradeKind::Deploy,
            "storage" | "storage_deposit" | "storagedeposit" => TradeKind::Storage,
            _ => TradeKind::Other,
        }
    }
}

/// Normalised trade history entry.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TradeKind,
    pub asset: SmolStr,
    /// Non-negative quantity of `asset`.
    pub amount: f64,
    /// Sentiment score at execution time, in `[-1, 1]`.
    pub sentiment: f64,
    #[serde(rename = "txHash", default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Coarse sentiment bucket displayed alongside a score.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
pub enum SentimentStatus {
    #[display("Very Positive")]
    VeryPositive,
    #[display("Positive")]
    Positive,
    #[display("Neutral")]
    Neutral,
    #[display("Negative")]
    Negative,
    #[display("Very Negative")]
    VeryNegative,
}

impl SentimentStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.5 {
            SentimentStatus::VeryPositive
        } else if score >= 0.2 {
            SentimentStatus::Positive
        } else if score >= -0.2 {
            SentimentStatus::Neutral
        } else if score >= -0.5 {
            SentimentStatus::Negative
        } else {
            SentimentStatus::VeryNegative
        }
    }
}

fn is_determined(asset: &str) -> bool {
    !asset.is_empty() && asset != UNKNOWN_ASSET
}
