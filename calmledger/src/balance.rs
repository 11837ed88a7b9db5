//! Balance snapshot read by the payment guards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balances of the connected address at one point in time.
///
/// `token_balance` is `None` when the payer has no token account for the
/// payment token yet. Guards treat that as zero; diagnostics can still tell
/// "no account" apart from "empty account".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    /// Native currency balance (SOL), in display units.
    pub native_balance: Decimal,
    /// Payment token balance, in display units.
    pub token_balance: Option<Decimal>,
}

impl BalanceSnapshot {
    /// Token balance with a missing account counted as zero.
    #[must_use]
    pub fn token_balance_or_zero(&self) -> Decimal {
        self.token_balance.unwrap_or(Decimal::ZERO)
    }

    /// Whether the payer already holds a token account.
    #[must_use]
    pub const fn has_token_account(&self) -> bool {
        self.token_balance.is_some()
    }
}
