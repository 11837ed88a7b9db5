use std::sync::Arc;

use calmledger::PaymentError;
use solana_message::VersionedMessage;
use solana_message::v0::Message as MessageV0;
use solana_transaction::versioned::VersionedTransaction;

use super::{AccountFacts, TransferIntent, associated_token_address, fetch_mint, transfer_instructions};
use crate::chain::{BlockhashContext, RpcClientLike};

/// An unsigned transfer transaction and the blockhash it expires with.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    /// Unsigned v0 transaction with the payer as fee payer.
    pub transaction: VersionedTransaction,
    /// Blockhash the message was compiled against.
    pub blockhash: BlockhashContext,
}

impl BuiltTransaction {
    /// Number of instructions in the message.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.transaction.message.instructions().len()
    }
}

/// Builds unsigned transfer transactions for intents.
///
/// Performs no balance checks; those belong to the payment guards.
#[derive(Debug)]
pub struct TransactionBuilder<R> {
    rpc: Arc<R>,
    priority_micro_lamports: Option<u64>,
}

impl<R: RpcClientLike> TransactionBuilder<R> {
    /// Creates a builder that adds no priority fee.
    pub const fn new(rpc: Arc<R>) -> Self {
        Self {
            rpc,
            priority_micro_lamports: None,
        }
    }

    /// Sets the compute unit price in micro-lamports.
    #[must_use]
    pub const fn with_priority_fee(mut self, micro_lamports: Option<u64>) -> Self {
        self.priority_micro_lamports = micro_lamports;
        self
    }

    /// Builds the transaction carrying `intent`.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::InvalidMint`] if the on-chain mint is not a token mint
    ///   or its decimals differ from the intent's.
    /// - [`PaymentError::NetworkError`] if a chain read fails.
    /// - [`PaymentError::TransactionBuild`] if the message cannot be compiled.
    pub async fn build(&self, intent: &TransferIntent) -> Result<BuiltTransaction, PaymentError> {
        let mint = fetch_mint(intent.mint(), self.rpc.as_ref()).await?;
        if mint.decimals() != intent.decimals() {
            return Err(PaymentError::InvalidMint(format!(
                "mint {} has {} decimals, expected {}",
                intent.mint(),
                mint.decimals(),
                intent.decimals()
            )));
        }

        let token_program = mint.token_program();
        let source_ata = associated_token_address(intent.payer(), &token_program, intent.mint());
        let destination_ata =
            associated_token_address(intent.recipient(), &token_program, intent.mint());
        let facts = AccountFacts {
            payer_account_exists: self.account_exists(&source_ata).await?,
            recipient_account_exists: self.account_exists(&destination_ata).await?,
        };

        let instructions =
            transfer_instructions(intent, mint, facts, self.priority_micro_lamports)?;

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| PaymentError::NetworkError(format!("latest blockhash: {e}")))?;
        let message = MessageV0::try_compile(
            intent.payer().pubkey(),
            &instructions,
            &[],
            blockhash.blockhash,
        )
        .map_err(|e| PaymentError::TransactionBuild(format!("{e:?}")))?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            payer = %intent.payer(),
            recipient = %intent.recipient(),
            amount = intent.amount_minor_units(),
            instructions = instructions.len(),
            create_payer_account = !facts.payer_account_exists,
            create_recipient_account = !facts.recipient_account_exists,
            "built transfer transaction"
        );

        Ok(BuiltTransaction {
            transaction: VersionedTransaction {
                signatures: vec![],
                message: VersionedMessage::V0(message),
            },
            blockhash,
        })
    }

    async fn account_exists(&self, pubkey: &solana_pubkey::Pubkey) -> Result<bool, PaymentError> {
        self.rpc
            .get_account(pubkey)
            .await
            .map(|account| account.is_some())
            .map_err(|e| PaymentError::NetworkError(format!("account {pubkey}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRpc, usdc};
    use crate::transfer::ATA_PROGRAM_PUBKEY;
    use solana_pubkey::Pubkey;

    #[tokio::test]
    async fn test_existing_accounts_need_one_instruction() {
        let rpc = MockRpc::new();
        let payer = rpc.fund_native(20_000_000);
        let recipient: crate::chain::Address = Pubkey::new_unique().into();
        rpc.fund_token(&payer, 350_000_000);
        rpc.fund_token(&recipient, 0);
        let intent = TransferIntent::for_price(payer, recipient, usdc(), "350").unwrap();

        let built = TransactionBuilder::new(Arc::new(rpc)).build(&intent).await.unwrap();
        assert_eq!(built.instruction_count(), 1);
        assert!(built.transaction.signatures.is_empty());
        assert_eq!(
            built.transaction.message.static_account_keys()[0],
            *payer.pubkey()
        );
    }

    #[tokio::test]
    async fn test_missing_recipient_account_is_created() {
        let rpc = MockRpc::new();
        let payer = rpc.fund_native(20_000_000);
        rpc.fund_token(&payer, 1_000_000);
        let intent =
            TransferIntent::for_price(payer, Pubkey::new_unique().into(), usdc(), "1").unwrap();

        let built = TransactionBuilder::new(Arc::new(rpc))
            .with_priority_fee(Some(1_000))
            .build(&intent)
            .await
            .unwrap();
        let keys = built.transaction.message.static_account_keys();
        let programs: Vec<Pubkey> = built
            .transaction
            .message
            .instructions()
            .iter()
            .map(|ix| keys[usize::from(ix.program_id_index)])
            .collect();
        assert_eq!(
            programs,
            vec![
                solana_compute_budget_interface::ID,
                ATA_PROGRAM_PUBKEY,
                spl_token::ID
            ]
        );
    }

    #[tokio::test]
    async fn test_decimals_mismatch_is_invalid_mint() {
        let rpc = MockRpc::new();
        let payer = rpc.fund_native(20_000_000);
        let mut token = usdc();
        token.decimals = 9;
        let intent = TransferIntent::for_price(payer, Pubkey::new_unique().into(), token, "1")
            .unwrap();
        assert!(matches!(
            TransactionBuilder::new(Arc::new(rpc)).build(&intent).await,
            Err(PaymentError::InvalidMint(_))
        ));
    }
}
