//! Account identity as supplied by the wallet/session collaborator, and the [`AccountMode`]
//! derived from it.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Snapshot of the wallet/session collaborator's current state.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub signed_in: bool,
    pub using_demo: bool,
    pub account_id: Option<SmolStr>,
}

impl AccountState {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn demo() -> Self {
        Self {
            signed_in: true,
            using_demo: true,
            account_id: None,
        }
    }

    pub fn signed_in(account_id: impl Into<SmolStr>) -> Self {
        Self {
            signed_in: true,
            using_demo: false,
            account_id: Some(account_id.into()),
        }
    }
}

/// Category of account that governs the order in which data sources are attempted.
///
/// Derived on every account change and never persisted.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AccountMode {
    #[display("demo")]
    Demo,
    #[display("contract_identified")]
    ContractIdentified,
    #[display("authenticated_generic")]
    AuthenticatedGeneric,
    #[display("anonymous")]
    Anonymous,
}

impl AccountMode {
    /// Derive the [`AccountMode`] for an [`AccountState`].
    ///
    /// `identified` lists the accounts that have a deployed, verified contract wired to real
    /// data. The demo flag wins over any sign-in state.
    pub fn derive(state: &AccountState, identified: &[SmolStr]) -> Self {
        if state.using_demo {
            return AccountMode::Demo;
        }

        if !state.signed_in {
            return AccountMode::Anonymous;
        }

        match &state.account_id {
            Some(account) if identified.iter().any(|known| known == account) => {
                AccountMode::ContractIdentified
            }
            _ => AccountMode::AuthenticatedGeneric,
        }
    }
}

/// Explicit account context handed to the resolver on every call.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AccountContext {
    pub mode: AccountMode,
    pub account_id: Option<SmolStr>,
}

impl AccountContext {
    pub fn new(state: &AccountState, identified: &[SmolStr]) -> Self {
        Self {
            mode: AccountMode::derive(state, identified),
            account_id: state.account_id.clone(),
        }
    }

    /// Account passed to account-scoped contract views. Only a contract-identified account
    /// queries per-account data; every other mode uses the generic views.
    pub fn contract_scope(&self) -> Option<&str> {
        match self.mode {
            AccountMode::ContractIdentified => self.account_id.as_deref(),
            _ => None,
        }
    }
}
