use crate::{model::DatasetKind, provider::SourceId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// All errors generated in `rebalancer-data`.
///
/// None of these escape the [`FallbackResolver`](crate::resolver::FallbackResolver): each one is
/// absorbed and mapped onto the next source, a dropped record, or a substituted default asset.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("{provider} unavailable: {reason}")]
    SourceUnavailable { provider: SourceId, reason: String },

    #[error("{provider} did not respond within {timeout:?}")]
    Timeout { provider: SourceId, timeout: Duration },

    #[error("malformed {kind} record: {reason}")]
    MalformedRecord { kind: DatasetKind, reason: String },

    #[error("no assets could be determined for the account")]
    NoAssetsResolved,
}

impl DataError {
    /// Construct a [`DataError::SourceUnavailable`] from anything displayable.
    pub fn unavailable(provider: SourceId, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            provider,
            reason: reason.into(),
        }
    }

    /// Construct a [`DataError::MalformedRecord`] from anything displayable.
    pub fn malformed(kind: DatasetKind, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            kind,
            reason: reason.into(),
        }
    }

    /// Determine if an error moves a fallback chain on to its next source.
    ///
    /// A malformed record only removes itself from a result set, and a missing asset set is
    /// repaired in place, so neither abandons the source that produced it.
    #[allow(clippy::match_like_matches_macro)]
    pub fn advances_chain(&self) -> bool {
        match self {
            DataError::SourceUnavailable { .. } | DataError::Timeout { .. } => true,
            _ => false,
        }
    }
}
