use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use solana_keypair::Keypair;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;

use super::{ConnectMode, WalletError, WalletProvider};
use crate::chain::Address;

/// A request the wallet shows to the user before acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRequest {
    /// The app asks to see the account address.
    Connect {
        /// Wallet asking.
        wallet: String,
        /// Address that would be shared.
        address: Address,
    },
    /// The app asks for a signature.
    SignTransaction {
        /// Wallet asking.
        wallet: String,
        /// Fee payer and signer of the transaction.
        signer: Address,
        /// Number of instructions in the message.
        instructions: usize,
    },
}

type ApprovalFn = dyn Fn(&ApprovalRequest) -> bool + Send + Sync;

/// Decides whether a [`KeypairWallet`] goes ahead with a request.
#[derive(Clone)]
pub enum ApprovalPolicy {
    /// Every request is approved.
    AutoApprove,
    /// Every request is declined.
    Deny,
    /// The callback decides. It runs on the blocking pool, so it may wait on
    /// terminal input.
    Prompt(Arc<ApprovalFn>),
}

impl fmt::Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApprove => f.write_str("AutoApprove"),
            Self::Deny => f.write_str("Deny"),
            Self::Prompt(_) => f.write_str("Prompt(..)"),
        }
    }
}

impl ApprovalPolicy {
    /// Wraps a prompt callback.
    pub fn prompt(f: impl Fn(&ApprovalRequest) -> bool + Send + Sync + 'static) -> Self {
        Self::Prompt(Arc::new(f))
    }

    async fn approve(&self, request: ApprovalRequest) -> bool {
        match self {
            Self::AutoApprove => true,
            Self::Deny => false,
            Self::Prompt(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(&request))
                    .await
                    .unwrap_or(false)
            }
        }
    }
}

/// Wallet backed by a local ed25519 keypair.
///
/// A trusted wallet connects without asking and is picked up by silent
/// reconnection; an untrusted one asks through its [`ApprovalPolicy`].
/// Signing always asks.
pub struct KeypairWallet {
    name: String,
    keypair: Keypair,
    trusted: bool,
    approval: ApprovalPolicy,
    connected: AtomicBool,
}

impl fmt::Debug for KeypairWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairWallet")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

impl KeypairWallet {
    /// Creates an untrusted, auto-approving wallet for `keypair`.
    pub fn new(name: impl Into<String>, keypair: Keypair) -> Self {
        Self {
            name: name.into(),
            keypair,
            trusted: false,
            approval: ApprovalPolicy::AutoApprove,
            connected: AtomicBool::new(false),
        }
    }

    /// Loads a keypair from a JSON array of 64 bytes, the format written by
    /// `solana-keygen`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Keypair`] if the file cannot be read or does not
    /// hold a valid keypair.
    pub fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Keypair(format!("{}: {e}", path.display())))?;
        let bytes: Vec<u8> = serde_json::from_str(&raw)
            .map_err(|e| WalletError::Keypair(format!("{}: {e}", path.display())))?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| WalletError::Keypair(format!("{}: {e}", path.display())))?;
        Ok(Self::new(name, keypair))
    }

    /// Marks the wallet as already trusting this app.
    #[must_use]
    pub const fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Sets how requests are approved.
    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = approval;
        self
    }

    /// Address of the wallet's account.
    #[must_use]
    pub fn address(&self) -> Address {
        self.keypair.pubkey().into()
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn sign_with_keypair(
        &self,
        mut tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, WalletError> {
        let msg_bytes = tx.message.serialize();
        let signature = self
            .keypair
            .try_sign_message(msg_bytes.as_slice())
            .map_err(|e| WalletError::Signing(format!("{e}")))?;

        let num_required = usize::from(tx.message.header().num_required_signatures);
        let pos = tx
            .message
            .static_account_keys()
            .iter()
            .take(num_required)
            .position(|k| *k == self.keypair.pubkey())
            .ok_or_else(|| WalletError::Signing("signer not found in required signers".into()))?;

        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[pos] = signature;
        Ok(tx)
    }
}

#[async_trait]
impl WalletProvider for KeypairWallet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, mode: ConnectMode) -> Result<Address, WalletError> {
        let address = self.address();
        if !self.trusted {
            if mode == ConnectMode::OnlyIfTrusted {
                return Err(WalletError::NotTrusted);
            }
            let request = ApprovalRequest::Connect {
                wallet: self.name.clone(),
                address,
            };
            if !self.approval.approve(request).await {
                return Err(WalletError::Rejected);
            }
        }
        self.connected.store(true, Ordering::Release);
        Ok(address)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn sign_transaction(
        &self,
        transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, WalletError> {
        if !self.is_connected() {
            return Err(WalletError::NotConnected);
        }
        let request = ApprovalRequest::SignTransaction {
            wallet: self.name.clone(),
            signer: self.address(),
            instructions: transaction.message.instructions().len(),
        };
        if !self.approval.approve(request).await {
            return Err(WalletError::Rejected);
        }
        self.sign_with_keypair(transaction)
    }
}
