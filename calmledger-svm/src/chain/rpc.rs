use async_trait::async_trait;
use solana_account::Account;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_message::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

/// Errors returned by [`RpcClientLike`] calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The request failed in transport or was rejected by the node.
    #[error("rpc request failed: {0}")]
    Request(String),
    /// The node answered with something the caller cannot use.
    #[error("unexpected rpc response: {0}")]
    UnexpectedResponse(String),
}

/// The blockhash a transaction was compiled against.
///
/// A transaction referencing `blockhash` can only be included while the
/// chain's block height is at most `last_valid_block_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashContext {
    /// Recent blockhash baked into the message.
    pub blockhash: Hash,
    /// Last block height at which the transaction can still land.
    pub last_valid_block_height: u64,
}

impl BlockhashContext {
    /// Whether a chain at `block_height` can no longer include the transaction.
    #[must_use]
    pub const fn is_expired_at(&self, block_height: u64) -> bool {
        block_height > self.last_valid_block_height
    }
}

/// What the node knows about a submitted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// Slot the transaction was processed in.
    pub slot: u64,
    /// Whether the status satisfies `confirmed` commitment.
    pub confirmed: bool,
    /// Execution error, if the transaction failed on chain.
    pub err: Option<String>,
}

/// RPC calls the checkout flow makes against a Solana node.
///
/// Implemented for the nonblocking [`RpcClient`]; tests substitute a
/// scripted double.
#[async_trait]
pub trait RpcClientLike: Send + Sync {
    /// Native balance of `pubkey` in lamports.
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError>;

    /// Account at `pubkey`, or `None` if it does not exist.
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcError>;

    /// Latest blockhash and its validity bound at `confirmed` commitment.
    async fn get_latest_blockhash(&self) -> Result<BlockhashContext, RpcError>;

    /// Broadcasts a fully signed transaction.
    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcError>;

    /// Status of `signature`, or `None` if the node has not seen it.
    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError>;

    /// Current block height at `confirmed` commitment.
    async fn get_block_height(&self) -> Result<u64, RpcError>;
}

fn request_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::Request(e.to_string())
}

#[async_trait]
impl RpcClientLike for RpcClient {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        self.get_balance_with_commitment(pubkey, CommitmentConfig::confirmed())
            .await
            .map(|response| response.value)
            .map_err(request_error)
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcError> {
        self.get_account_with_commitment(pubkey, CommitmentConfig::confirmed())
            .await
            .map(|response| response.value)
            .map_err(request_error)
    }

    async fn get_latest_blockhash(&self) -> Result<BlockhashContext, RpcError> {
        let (blockhash, last_valid_block_height) = self
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(request_error)?;
        Ok(BlockhashContext {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcError> {
        Self::send_transaction(self, transaction)
            .await
            .map_err(request_error)
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        let response = self
            .get_signature_statuses(&[*signature])
            .await
            .map_err(request_error)?;
        let status = response.value.into_iter().next().ok_or_else(|| {
            RpcError::UnexpectedResponse("empty signature status list".to_owned())
        })?;
        Ok(status.map(|status| SignatureStatus {
            slot: status.slot,
            confirmed: status.satisfies_commitment(CommitmentConfig::confirmed()),
            err: status.err.as_ref().map(|err| format!("{err:?}")),
        }))
    }

    async fn get_block_height(&self) -> Result<u64, RpcError> {
        self.get_block_height_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(request_error)
    }
}
