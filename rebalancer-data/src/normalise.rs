//! Record normalisation.
//!
//! Sources disagree on field names and types for the same concept (`asset` vs `crypto` vs
//! `symbol`, numeric strings vs numbers, ISO strings vs epoch nanoseconds). Each function here
//! is total over JSON input: it resolves fields in a fixed order, coerces best-effort with a
//! zero default, and only reports [`DataError::MalformedRecord`] when the record has no usable
//! shape at all. Normalising an already canonical record returns it unchanged.

use crate::{
    error::DataError,
    model::{
        Allocation, DatasetKind, HistoryPoint, SentimentScore, TradeKind, TradeRecord,
        UNKNOWN_ASSET,
    },
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use smol_str::SmolStr;

/// Raw, source-shaped record as returned by a [`SourceProvider`](crate::provider::SourceProvider).
pub type RawRecord = Value;

const ASSET_FIELDS: [&str; 3] = ["asset", "crypto", "symbol"];
const PERCENTAGE_FIELDS: [&str; 3] = ["percentage", "value", "amount"];
const SCORE_FIELDS: [&str; 3] = ["score", "sentiment", "value"];
const CHANGE_FIELDS: [&str; 2] = ["change", "delta"];
const DATE_FIELDS: [&str; 4] = ["date", "day", "timestamp", "time"];
const TIMESTAMP_FIELDS: [&str; 4] = ["timestamp", "time", "block_timestamp", "date"];
const TRADE_KIND_FIELDS: [&str; 3] = ["type", "kind", "action"];
const TRADE_SENTIMENT_FIELDS: [&str; 2] = ["sentiment", "score"];
const TX_HASH_FIELDS: [&str; 4] = ["txHash", "tx_hash", "transaction_hash", "hash"];

/// Canonical output of [`normalise`], tagged by dataset kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Canonical {
    Allocation(Allocation),
    Sentiment(SentimentScore),
    History(HistoryPoint),
    Trade(TradeRecord),
}

/// Normalise a single raw record into the canonical shape for `kind`.
pub fn normalise(record: &RawRecord, kind: DatasetKind) -> Result<Canonical, DataError> {
    match kind {
        DatasetKind::Portfolio => normalise_allocation(record).map(Canonical::Allocation),
        DatasetKind::Sentiments => normalise_sentiment(record).map(Canonical::Sentiment),
        DatasetKind::SentimentHistory => normalise_history_point(record).map(Canonical::History),
        DatasetKind::Trades => normalise_trade(record).map(Canonical::Trade),
    }
}

/// Normalise a portfolio allocation entry.
///
/// Percentage resolves `percentage` -> `value` -> `amount` -> 0 and is clamped to `[0, 100]`.
/// An entry without a determinable asset carries [`UNKNOWN_ASSET`] and is left for the caller
/// to drop.
pub fn normalise_allocation(record: &RawRecord) -> Result<Allocation, DataError> {
    let fields = as_object(record, DatasetKind::Portfolio)?;

    let percentage = first_present(fields, &PERCENTAGE_FIELDS)
        .and_then(coerce_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    Ok(Allocation {
        asset: asset_label(fields),
        percentage,
    })
}

/// Normalise a market-wide sentiment score.
pub fn normalise_sentiment(record: &RawRecord) -> Result<SentimentScore, DataError> {
    let fields = as_object(record, DatasetKind::Sentiments)?;

    Ok(SentimentScore {
        asset: asset_label(fields),
        score: score_from(fields, &SCORE_FIELDS),
        change: first_present(fields, &CHANGE_FIELDS)
            .and_then(coerce_f64)
            .unwrap_or(0.0),
    })
}

/// Normalise one sentiment history point. A point without a parseable calendar date is
/// malformed.
pub fn normalise_history_point(record: &RawRecord) -> Result<HistoryPoint, DataError> {
    let fields = as_object(record, DatasetKind::SentimentHistory)?;

    let date = first_present(fields, &DATE_FIELDS)
        .and_then(parse_date)
        .ok_or_else(|| {
            DataError::malformed(DatasetKind::SentimentHistory, "date missing or unparseable")
        })?;

    Ok(HistoryPoint {
        date,
        score: score_from(fields, &SCORE_FIELDS),
    })
}

/// Normalise a trade history entry.
///
/// `amount` is read from the `amount` field only: numbers and numeric strings are accepted,
/// anything else becomes `0.0`. A trade without a parseable timestamp is malformed.
pub fn normalise_trade(record: &RawRecord) -> Result<TradeRecord, DataError> {
    let fields = as_object(record, DatasetKind::Trades)?;

    let timestamp = first_present(fields, &TIMESTAMP_FIELDS)
        .and_then(parse_datetime)
        .ok_or_else(|| DataError::malformed(DatasetKind::Trades, "timestamp missing or unparseable"))?;

    let kind = first_present(fields, &TRADE_KIND_FIELDS)
        .and_then(Value::as_str)
        .map(TradeKind::from_label)
        .unwrap_or(TradeKind::Other);

    let amount = fields
        .get("amount")
        .and_then(coerce_f64)
        .map(f64::abs)
        .unwrap_or(0.0);

    let tx_hash = first_present(fields, &TX_HASH_FIELDS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(str::to_string);

    Ok(TradeRecord {
        timestamp,
        kind,
        asset: asset_label(fields),
        amount,
        sentiment: score_from(fields, &TRADE_SENTIMENT_FIELDS),
        tx_hash,
    })
}

/// Expand compact source shapes into one record per asset.
///
/// Contract views commonly answer with a keyed map (`{"BTC": 40}` or
/// `{"BTC": {"allocation": 35}}`) or a list of `[asset, value]` pairs instead of a list of
/// records. Both are rewritten as records carrying an `asset` field, with scalar values placed
/// under `value_field`. Anything else, including already canonical records, passes through.
pub fn expand_record(record: RawRecord, value_field: &str) -> Vec<RawRecord> {
    match record {
        Value::Array(items) => match items.as_slice() {
            [Value::String(asset), value] => {
                vec![keyed_record(asset, value.clone(), value_field)]
            }
            _ => items
                .into_iter()
                .flat_map(|item| expand_record(item, value_field))
                .collect(),
        },
        Value::Object(fields) if is_keyed_map(&fields) => fields
            .into_iter()
            .map(|(asset, value)| keyed_record(&asset, value, value_field))
            .collect(),
        other => vec![other],
    }
}

/// Resolve the asset label: `asset` -> `crypto` -> `symbol` -> [`UNKNOWN_ASSET`].
///
/// Labels are trimmed and uppercased. A label that already reads "unknown" stays the sentinel
/// so re-normalisation is stable.
pub fn asset_label(fields: &Map<String, Value>) -> SmolStr {
    ASSET_FIELDS
        .iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|label| !label.is_empty())
        .filter(|label| !label.eq_ignore_ascii_case(UNKNOWN_ASSET))
        .map(|label| SmolStr::new(label.to_ascii_uppercase()))
        .unwrap_or_else(|| SmolStr::new_static(UNKNOWN_ASSET))
}

/// Best-effort numeric coercion of a JSON number or numeric string. Non-finite values are
/// treated as absent.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    number.is_finite().then_some(number)
}

fn as_object(record: &RawRecord, kind: DatasetKind) -> Result<&Map<String, Value>, DataError> {
    record
        .as_object()
        .ok_or_else(|| DataError::malformed(kind, format!("expected object, found {record}")))
}

/// First field in `keys` that is present and not null.
fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

fn score_from(fields: &Map<String, Value>, keys: &[&str]) -> f64 {
    first_present(fields, keys)
        .and_then(coerce_f64)
        .unwrap_or(0.0)
        .clamp(-1.0, 1.0)
}

fn is_keyed_map(fields: &Map<String, Value>) -> bool {
    !fields.is_empty()
        && !fields.keys().any(|key| is_record_field(key))
        && fields
            .values()
            .all(|value| value.is_object() || coerce_f64(value).is_some())
}

fn is_record_field(key: &str) -> bool {
    [
        ASSET_FIELDS.as_slice(),
        PERCENTAGE_FIELDS.as_slice(),
        SCORE_FIELDS.as_slice(),
        CHANGE_FIELDS.as_slice(),
        DATE_FIELDS.as_slice(),
        TIMESTAMP_FIELDS.as_slice(),
        TRADE_KIND_FIELDS.as_slice(),
        TX_HASH_FIELDS.as_slice(),
        ["allocation", "block_timestamp"].as_slice(),
    ]
    .iter()
    .any(|fields| fields.contains(&key))
}

fn keyed_record(asset: &str, value: Value, value_field: &str) -> Value {
    let mut record = match value {
        Value::Object(fields) => fields,
        scalar => {
            let mut fields = Map::new();
            fields.insert(value_field.to_string(), scalar);
            fields
        }
    };

    if !ASSET_FIELDS.iter().any(|key| record.contains_key(*key)) {
        record.insert("asset".to_string(), Value::String(asset.to_string()));
    }

    // Contract portfolio entries carry the weight under `allocation`
    if !record.contains_key(value_field) {
        if let Some(allocation) = record.get("allocation").cloned() {
            record.insert(value_field.to_string(), allocation);
        }
    }

    Value::Object(record)
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime_str(raw).map(|time| time.date_naive()))
        }
        Value::Number(_) => parse_datetime(value).map(|time| time.date_naive()),
        _ => None,
    }
}

fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            parse_datetime_str(raw)
                .or_else(|| raw.parse::<i64>().ok().and_then(datetime_from_epoch))
                .or_else(|| raw.parse::<f64>().ok().and_then(datetime_from_epoch_f64))
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(datetime_from_epoch)
            .or_else(|| number.as_f64().and_then(datetime_from_epoch_f64)),
        _ => None,
    }
}

fn parse_datetime_str(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|time| time.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|time| time.and_utc())
        })
}

/// Interpret an epoch number by magnitude: NEAR block timestamps are nanoseconds, most REST
/// payloads are milliseconds.
fn datetime_from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    let nanos = match epoch {
        ..0 => return None,
        100_000_000_000_000_000.. => epoch,
        100_000_000_000_000.. => epoch.checked_mul(1_000)?,
        100_000_000_000.. => epoch.checked_mul(1_000_000)?,
        _ => epoch.checked_mul(1_000_000_000)?,
    };

    Some(DateTime::from_timestamp_nanos(nanos))
}

fn datetime_from_epoch_f64(epoch: f64) -> Option<DateTime<Utc>> {
    (epoch.is_finite() && epoch >= 0.0 && epoch < i64::MAX as f64)
        .then(|| epoch.round() as i64)
        .and_then(datetime_from_epoch)
}
