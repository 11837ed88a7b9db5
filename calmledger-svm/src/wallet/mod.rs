//! Wallet providers and the connector that holds the active session.
//!
//! A [`WalletProvider`] is anything that can hand out an address and sign a
//! transaction for it. [`ProviderRegistry`] is assembled once at startup and
//! lists both the providers that are available and well-known wallets that are
//! not, so the checkout can point the user at an install page.
//! [`WalletConnector`] owns the single [`WalletSession`].

use async_trait::async_trait;
use calmledger::PaymentError;
use solana_transaction::versioned::VersionedTransaction;

use crate::chain::Address;

mod connector;
mod keypair;
mod registry;

pub use connector::{WalletConnector, WalletSession};
pub use keypair::{ApprovalPolicy, ApprovalRequest, KeypairWallet};
pub use registry::{AbsentWallet, ProviderListing, ProviderRegistry, ProviderStatus};

/// How a connection request may interact with the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// The provider may ask the user to approve the connection.
    Prompt,
    /// Connect only if the provider already trusts this app; never prompt.
    OnlyIfTrusted,
}

/// Errors reported by wallet providers.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The user declined the request.
    #[error("user rejected the request")]
    Rejected,
    /// A silent connection was requested but the app is not trusted.
    #[error("wallet does not trust this app yet")]
    NotTrusted,
    /// The provider has no active connection.
    #[error("wallet is not connected")]
    NotConnected,
    /// The provider is not available in this environment.
    #[error("wallet provider {0} is not installed")]
    Unavailable(String),
    /// The provider failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The signing key could not be loaded.
    #[error("could not load keypair: {0}")]
    Keypair(String),
}

impl From<WalletError> for PaymentError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Rejected | WalletError::NotTrusted => Self::UserRejected,
            WalletError::NotConnected => Self::NotConnected,
            WalletError::Unavailable(provider) => Self::ProviderNotInstalled {
                provider,
                install_url: None,
            },
            WalletError::Signing(reason) | WalletError::Keypair(reason) => {
                Self::TransactionBuild(reason)
            }
        }
    }
}

/// Capabilities every wallet provider offers to the checkout.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Display name, matched case-insensitively when connecting.
    fn name(&self) -> &str;

    /// Whether the provider can be used in this environment.
    fn is_installed(&self) -> bool {
        true
    }

    /// Where to get the provider, for providers that are not installed.
    fn install_url(&self) -> Option<&str> {
        None
    }

    /// Opens a connection and returns the account address.
    async fn connect(&self, mode: ConnectMode) -> Result<Address, WalletError>;

    /// Closes the connection. Disconnecting twice is not an error.
    async fn disconnect(&self) -> Result<(), WalletError>;

    /// Signs `transaction` with the connected account.
    async fn sign_transaction(
        &self,
        transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, WalletError>;
}
