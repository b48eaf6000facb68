//! Simulated data generator.
//!
//! Every simulated value is anchored on a deterministic per-asset [`base_signal`] so the same
//! asset always leans the same way, then perturbed by bounded randomness. Only the base signal
//! is reproducible; the perturbation is presentation realism and differs between calls.

use crate::{
    model::{Allocation, HistoryPoint, HistorySeries, SentimentScore, TradeKind, TradeRecord},
    provider::TradeQuery,
};
use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use rand::Rng;
use smol_str::SmolStr;
use std::f64::consts::PI;

/// Maximum perturbation applied to a simulated point score.
pub const SCORE_JITTER: f64 = 0.2;

/// Maximum perturbation applied to a simulated change delta.
pub const CHANGE_JITTER: f64 = 0.35;

/// Maximum per-day perturbation applied to a simulated history point.
pub const HISTORY_JITTER: f64 = 0.1;

/// Amplitude of the sine trend across a simulated history window.
pub const HISTORY_TREND: f64 = 0.25;

const BASE_SIGNAL_RANGE: f64 = 0.8;

/// Deterministic base signal of an asset identifier in `[-0.8, 0.8]`: the sum of its character
/// codes modulo 100, mapped linearly onto the range.
pub fn base_signal(asset: &str) -> f64 {
    let codes = asset.chars().map(u32::from).fold(0_u32, u32::wrapping_add);
    let bucket = f64::from(codes % 100);

    -BASE_SIGNAL_RANGE + (bucket / 99.0) * (2.0 * BASE_SIGNAL_RANGE)
}

/// Simulated market-wide sentiment for one asset.
pub fn sentiment(asset: &str) -> SentimentScore {
    sentiment_with(asset, &mut rand::rng())
}

/// Simulated sentiment for every asset in `assets`, in order.
pub fn sentiments(assets: &[SmolStr]) -> Vec<SentimentScore> {
    let mut rng = rand::rng();
    assets
        .iter()
        .map(|asset| sentiment_with(asset, &mut rng))
        .collect()
}

/// Simulated sentiment for one asset using the provided random source.
pub fn sentiment_with<R>(asset: &str, rng: &mut R) -> SentimentScore
where
    R: Rng,
{
    let base = base_signal(asset);
    let score = clamp_score(base + rng.random_range(-SCORE_JITTER..=SCORE_JITTER));
    let change = round2(base * 0.25 + rng.random_range(-CHANGE_JITTER..=CHANGE_JITTER));

    SentimentScore::new(asset, score, change)
}

/// Simulated `days` day history for `asset`, ending today.
pub fn history(asset: &str, days: usize) -> HistorySeries {
    history_with(asset, days, Utc::now().date_naive(), &mut rand::rng())
}

/// Simulated history of exactly `days` points, oldest first, ending on `today`.
///
/// Each point is the base signal plus one sine cycle across the window plus per-day noise,
/// clamped to `[-1, 1]`. A window reaching past the representable calendar yields no points.
pub fn history_with<R>(asset: &str, days: usize, today: NaiveDate, rng: &mut R) -> HistorySeries
where
    R: Rng,
{
    let base = base_signal(asset);
    let start = days
        .checked_sub(1)
        .and_then(|span| today.checked_sub_days(Days::new(span as u64)));

    let points = match start {
        Some(start) => (0..days)
            .map_while(|index| {
                let date = start.checked_add_days(Days::new(index as u64))?;
                let trend = HISTORY_TREND * (2.0 * PI * index as f64 / days as f64).sin();
                let noise = rng.random_range(-HISTORY_JITTER..=HISTORY_JITTER);
                Some(HistoryPoint::new(date, clamp_score(base + trend + noise)))
            })
            .collect(),
        None => Vec::new(),
    };

    HistorySeries {
        asset: SmolStr::new(asset),
        points,
    }
}

/// Simulated history point for a single date.
pub fn history_point_with<R>(asset: &str, date: NaiveDate, rng: &mut R) -> HistoryPoint
where
    R: Rng,
{
    let noise = rng.random_range(-HISTORY_JITTER..=HISTORY_JITTER);
    HistoryPoint::new(date, clamp_score(base_signal(asset) + noise))
}

/// Simulated allocation across `assets`, weighted by each asset's base signal.
///
/// Fully deterministic. Percentages are rounded to two decimals and sum to exactly 100.
pub fn portfolio(assets: &[SmolStr]) -> Vec<Allocation> {
    let weights = assets
        .iter()
        .map(|asset| base_signal(asset) + 1.0)
        .collect::<Vec<_>>();
    let total = weights.iter().sum::<f64>();

    let mut allocations = assets
        .iter()
        .zip(&weights)
        .map(|(asset, weight)| Allocation::new(asset.clone(), round2(weight / total * 100.0)))
        .collect::<Vec<_>>();

    // Absorb rounding drift in the last entry
    if let Some((last, rest)) = allocations.split_last_mut() {
        let assigned = rest.iter().map(|allocation| allocation.percentage).sum::<f64>();
        last.percentage = round2((100.0 - assigned).max(0.0));
    }

    allocations
}

/// Simulated trade history over `assets`, newest first, honouring the [`TradeQuery`] filters.
pub fn trades(assets: &[SmolStr], query: &TradeQuery) -> Vec<TradeRecord> {
    trades_with(assets, query, Utc::now(), &mut rand::rng())
}

/// Simulated trades spaced one hour apart going back from `now`. Each trade buys when the
/// simulated sentiment of its asset is non-negative and sells otherwise.
pub fn trades_with<R>(
    assets: &[SmolStr],
    query: &TradeQuery,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<TradeRecord>
where
    R: Rng,
{
    let assets = match &query.asset {
        Some(asset) => std::slice::from_ref(asset),
        None => assets,
    };

    if assets.is_empty() {
        return Vec::new();
    }

    (0..query.limit)
        .map(|index| {
            let asset = &assets[index % assets.len()];
            let sentiment = sentiment_with(asset, &mut *rng).score;
            let kind = if sentiment >= 0.0 {
                TradeKind::Buy
            } else {
                TradeKind::Sell
            };

            TradeRecord {
                timestamp: now - Duration::hours(index as i64),
                kind,
                asset: asset.clone(),
                amount: round2(rng.random_range(0.01..10.0)),
                sentiment,
                tx_hash: None,
            }
        })
        .collect()
}

fn clamp_score(score: f64) -> f64 {
    round2(score.clamp(-1.0, 1.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn assets() -> Vec<SmolStr> {
        ["BTC", "ETH", "NEAR", "SOL"]
            .into_iter()
            .map(SmolStr::new)
            .collect()
    }

    #[test]
    fn test_base_signal_is_deterministic_and_bounded() {
        struct TestCase {
            input: &'static str,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: 'B'(66) + 'T'(84) + 'C'(67) = 217 -> 17
                input: "BTC",
                expected: -0.8 + (17.0 / 99.0) * 1.6,
            },
            TestCase {
                // TC1: empty identifier sits at the bottom of the range
                input: "",
                expected: -0.8,
            },
            TestCase {
                // TC2: 'c'(99) sits at the top of the range
                input: "c",
                expected: 0.8,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = base_signal(test.input);
            assert!((actual - test.expected).abs() < 1e-12, "TC{} failed", index);
        }

        for asset in assets() {
            assert_eq!(base_signal(&asset), base_signal(&asset));
            assert!((-0.8..=0.8).contains(&base_signal(&asset)));
        }
    }

    #[test]
    fn test_sentiment_stays_within_jitter_of_base_signal() {
        let mut rng = StdRng::seed_from_u64(7);

        for asset in assets() {
            for _ in 0..50 {
                let actual = sentiment_with(&asset, &mut rng);
                let base = base_signal(&asset);

                assert_eq!(actual.asset, asset);
                assert!((-1.0..=1.0).contains(&actual.score));
                assert!((actual.score - base).abs() <= SCORE_JITTER + 0.005 + 1e-9);
                assert!((actual.change - base * 0.25).abs() <= CHANGE_JITTER + 0.005 + 1e-9);
            }
        }
    }

    #[test]
    fn test_history_has_exactly_n_points_ending_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for days in [1, 7, 30, 90] {
            let actual = history_with("NEAR", days, today, &mut rng);

            assert_eq!(actual.asset, "NEAR");
            assert_eq!(actual.points.len(), days);
            assert_eq!(actual.points.last().unwrap().date, today);
            assert!(
                actual
                    .points
                    .windows(2)
                    .all(|pair| pair[1].date - pair[0].date == Duration::days(1))
            );
            assert!(
                actual
                    .points
                    .iter()
                    .all(|point| (-1.0..=1.0).contains(&point.score))
            );
        }

        assert!(history_with("NEAR", 0, today, &mut rng).points.is_empty());
        assert!(history_with("NEAR", usize::MAX, today, &mut rng).points.is_empty());
    }

    #[test]
    fn test_portfolio_sums_to_one_hundred() {
        let actual = portfolio(&assets());

        assert_eq!(actual.len(), 4);
        assert_eq!(
            actual.iter().map(|allocation| allocation.asset.as_str()).collect::<Vec<_>>(),
            vec!["BTC", "ETH", "NEAR", "SOL"]
        );
        assert!(actual.iter().all(|allocation| allocation.percentage > 0.0));

        let total = actual.iter().map(|allocation| allocation.percentage).sum::<f64>();
        assert!((total - 100.0).abs() < 1e-9);

        assert_eq!(actual, portfolio(&assets()));
        assert!(portfolio(&[]).is_empty());
    }

    #[test]
    fn test_trades_newest_first_within_query() {
        let now = DateTime::parse_from_rfc3339("2024-03-07T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut rng = StdRng::seed_from_u64(3);

        let actual = trades_with(&assets(), &TradeQuery::new(6), now, &mut rng);
        assert_eq!(actual.len(), 6);
        assert_eq!(actual[0].timestamp, now);
        assert!(actual.windows(2).all(|pair| pair[0].timestamp > pair[1].timestamp));
        assert!(actual.iter().all(|trade| trade.amount > 0.0));
        assert!(
            actual
                .iter()
                .all(|trade| matches!(trade.kind, TradeKind::Buy | TradeKind::Sell))
        );

        let actual = trades_with(&assets(), &TradeQuery::new(3).with_asset("SOL"), now, &mut rng);
        assert!(actual.iter().all(|trade| trade.asset == "SOL"));

        assert!(trades_with(&[], &TradeQuery::default(), now, &mut rng).is_empty());
    }
}
