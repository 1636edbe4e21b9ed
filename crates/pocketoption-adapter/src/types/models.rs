/*
[INPUT]:  Venue wire schema and serde requirements
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - shared observable state models
[UPDATE]: When the wire schema changes or new types added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::AccountMode;
use super::responses::BalanceUpdate;

/// Last known account state.
///
/// Written only by the dispatcher (one writer per connection); readers get
/// a cloned snapshot, never a partially updated record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub mode: Option<AccountMode>,
    #[serde(default)]
    pub uid: Option<u64>,
    /// Whether the connection is currently authenticated
    #[serde(default)]
    pub connected: bool,
    /// Set once the venue has confirmed a balance change (`successupdateBalance`)
    #[serde(default)]
    pub balance_synced: bool,
}

impl AccountSnapshot {
    /// Fold a balance push into the snapshot
    pub fn apply_balance(&mut self, update: &BalanceUpdate) {
        self.balance = Some(update.balance);
        self.mode = Some(update.mode());
        if update.uid.is_some() {
            self.uid = update.uid;
        }
    }
}
