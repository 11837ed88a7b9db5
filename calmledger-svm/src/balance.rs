//! Native and token balance lookups.

use std::sync::Arc;

use calmledger::PaymentError;
use calmledger::amount::from_minor_units;
use calmledger::balance::BalanceSnapshot;
use rust_decimal::Decimal;
use spl_token::solana_program::program_pack::Pack;

use crate::chain::{Address, RpcClientLike};
use crate::networks::SolanaTokenDeployment;
use crate::transfer::associated_token_address;

/// Decimal places of SOL (lamports per SOL is 10^9).
pub const NATIVE_DECIMALS: u8 = 9;

/// Reads the balances the payment guards need.
#[derive(Debug)]
pub struct BalanceOracle<R> {
    rpc: Arc<R>,
    token: SolanaTokenDeployment,
}

impl<R: RpcClientLike> BalanceOracle<R> {
    /// Creates an oracle for `token`.
    pub const fn new(rpc: Arc<R>, token: SolanaTokenDeployment) -> Self {
        Self { rpc, token }
    }

    /// Native and token balance of `owner`.
    ///
    /// A missing token account yields `token_balance: None`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::NetworkError`] if either query fails or the
    /// token account cannot be decoded.
    pub async fn fetch_balances(&self, owner: &Address) -> Result<BalanceSnapshot, PaymentError> {
        let lamports = self
            .rpc
            .get_balance(owner.pubkey())
            .await
            .map_err(|e| PaymentError::NetworkError(format!("native balance of {owner}: {e}")))?;
        let token_balance = self.token_balance(owner).await?;
        let snapshot = BalanceSnapshot {
            native_balance: from_minor_units(lamports, NATIVE_DECIMALS),
            token_balance,
        };
        #[cfg(feature = "telemetry")]
        tracing::debug!(
            owner = %owner,
            native = %snapshot.native_balance,
            token = ?snapshot.token_balance,
            "fetched balances"
        );
        Ok(snapshot)
    }

    async fn token_balance(&self, owner: &Address) -> Result<Option<Decimal>, PaymentError> {
        let mint = &self.token.mint;
        // base layout is shared by SPL Token and Token-2022 accounts; try both
        for token_program in [spl_token::id(), spl_token_2022::id()] {
            let ata = associated_token_address(owner, &token_program, mint);
            let account = self.rpc.get_account(&ata).await.map_err(|e| {
                PaymentError::NetworkError(format!("token account {ata}: {e}"))
            })?;
            let Some(account) = account else {
                continue;
            };
            let data = account
                .data
                .get(..spl_token::state::Account::LEN)
                .ok_or_else(|| {
                    PaymentError::NetworkError(format!("token account {ata} is too short"))
                })?;
            let state = spl_token::state::Account::unpack(data).map_err(|e| {
                PaymentError::NetworkError(format!("failed to unpack token account {ata}: {e}"))
            })?;
            return Ok(Some(from_minor_units(state.amount, self.token.decimals)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRpc, usdc};

    #[tokio::test]
    async fn test_missing_token_account_is_none() {
        let rpc = MockRpc::new();
        let owner = rpc.fund_native(20_000_000);
        let oracle = BalanceOracle::new(Arc::new(rpc), usdc());
        let snapshot = oracle.fetch_balances(&owner).await.unwrap();
        assert_eq!(snapshot.native_balance, Decimal::new(2, 2));
        assert_eq!(snapshot.token_balance, None);
    }

    #[tokio::test]
    async fn test_token_account_read_failure_is_not_a_missing_account() {
        let rpc = MockRpc::new();
        let owner = rpc.fund_native(20_000_000);
        rpc.fail_account_reads(true);
        let oracle = BalanceOracle::new(Arc::new(rpc), usdc());
        assert!(matches!(
            oracle.fetch_balances(&owner).await,
            Err(PaymentError::NetworkError(_))
        ));
    }

    #[tokio::test]
    async fn test_token_balance_in_display_units() {
        let rpc = MockRpc::new();
        let owner = rpc.fund_native(20_000_000);
        rpc.fund_token(&owner, 350_000_000);
        let oracle = BalanceOracle::new(Arc::new(rpc), usdc());
        let snapshot = oracle.fetch_balances(&owner).await.unwrap();
        assert_eq!(snapshot.token_balance, Some(Decimal::from(350)));
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let rpc = MockRpc::new();
        let owner = rpc.fund_native(5_000_000);
        rpc.fund_token(&owner, 1);
        let oracle = BalanceOracle::new(Arc::new(rpc), usdc());
        let first = oracle.fetch_balances(&owner).await.unwrap();
        let second = oracle.fetch_balances(&owner).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_network_failures_propagate() {
        let rpc = MockRpc::new();
        let owner = rpc.fund_native(1);
        rpc.fail_reads(true);
        let oracle = BalanceOracle::new(Arc::new(rpc), usdc());
        assert!(matches!(
            oracle.fetch_balances(&owner).await,
            Err(PaymentError::NetworkError(_))
        ));
    }
}
