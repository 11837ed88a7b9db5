//! Error types for the checkout payment flow.
//!
//! [`PaymentError`] is the single taxonomy surfaced to the checkout view. Chain
//! crates map their transport and wallet errors into it so that, for example,
//! every wallet's refusal shows up as [`PaymentError::UserRejected`].

use rust_decimal::Decimal;

use crate::amount::AmountError;
use crate::attempt::AttemptState;
use crate::receipt::StorageError;

/// Errors raised while connecting, guarding, submitting or confirming a payment.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The requested wallet provider is not installed.
    #[error("wallet provider '{provider}' is not installed")]
    ProviderNotInstalled {
        /// Provider name as requested.
        provider: String,
        /// Where the user can install it, if the provider is known.
        install_url: Option<String>,
    },

    /// The user declined the request in their wallet.
    #[error("request rejected in wallet")]
    UserRejected,

    /// A read against the chain failed.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Token balance is below the payment amount.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount the intent moves, in display units.
        required: Decimal,
        /// Token balance held by the payer, in display units.
        available: Decimal,
    },

    /// Native balance is below the reserve kept for fees.
    #[error("insufficient fee reserve: required {required}, available {available}")]
    InsufficientFeeReserve {
        /// Configured fee reserve, in native display units.
        required: Decimal,
        /// Native balance held by the payer.
        available: Decimal,
    },

    /// The signed transaction could not be broadcast.
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    /// The transaction landed but its execution failed.
    #[error("transaction reverted: {0}")]
    ExecutionReverted(String),

    /// The blockhash expired before the transaction was seen as confirmed.
    #[error("confirmation timed out for transaction {signature}")]
    ConfirmationTimeout {
        /// Signature of the transaction whose outcome is unknown.
        signature: String,
    },

    /// The local receipt slot could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No wallet session is active.
    #[error("no wallet connected")]
    NotConnected,

    /// Another payment attempt holds the engine.
    #[error("a payment is already in progress")]
    AttemptInProgress,

    /// The local wait was abandoned by the caller.
    #[error("payment cancelled")]
    Cancelled,

    /// The price could not be turned into a transfer amount.
    #[error(transparent)]
    InvalidAmount(#[from] AmountError),

    /// The token mint does not match the configured deployment.
    #[error("invalid mint: {0}")]
    InvalidMint(String),

    /// A required input was left empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The transaction could not be assembled.
    #[error("could not build transaction: {0}")]
    TransactionBuild(String),

    /// An attempt was driven out of order.
    #[error("invalid attempt transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the attempt was in.
        from: AttemptState,
        /// State it was asked to enter.
        to: AttemptState,
    },
}

impl PaymentError {
    /// Returns the message shown to the user for this error.
    ///
    /// A [`PaymentError::ConfirmationTimeout`] is not a failure: the
    /// transaction may still land, so the message sends the user to their
    /// wallet history instead of asking them to pay again.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderNotInstalled {
                provider,
                install_url: Some(url),
            } => format!("{provider} is not installed. Install it from {url} and try again."),
            Self::ProviderNotInstalled { provider, .. } => {
                format!("{provider} is not installed.")
            }
            Self::UserRejected => "You rejected the request in your wallet.".to_owned(),
            Self::NetworkError(_) => {
                "Could not reach the Solana network. Please try again shortly.".to_owned()
            }
            Self::InsufficientFunds {
                required,
                available,
            } => format!(
                "Insufficient USDC balance: this plan costs {required} USDC and your wallet holds {available} USDC."
            ),
            Self::InsufficientFeeReserve {
                required,
                available,
            } => format!(
                "Not enough SOL for network fees: keep at least {required} SOL in your wallet (you have {available} SOL)."
            ),
            Self::BroadcastFailed(_) => {
                "The transaction could not be sent. No funds were moved.".to_owned()
            }
            Self::ExecutionReverted(reason) => {
                format!("The payment transaction failed on-chain ({reason}). Contact support with this message.")
            }
            Self::ConfirmationTimeout { signature } => format!(
                "The network has not confirmed transaction {signature} yet. It may still confirm: check your wallet history before paying again."
            ),
            Self::Storage(_) => "Your payment went through but the receipt could not be saved locally.".to_owned(),
            Self::NotConnected => "Connect a wallet to continue.".to_owned(),
            Self::AttemptInProgress => "A payment is already in progress.".to_owned(),
            Self::Cancelled => "Payment cancelled.".to_owned(),
            Self::MissingField(field) => format!("Please fill in your {field}."),
            Self::InvalidAmount(_)
            | Self::InvalidMint(_)
            | Self::TransactionBuild(_)
            | Self::InvalidTransition { .. } => {
                format!("Something went wrong preparing the payment: {self}")
            }
        }
    }

    /// Whether the payment outcome is unknown rather than failed.
    #[must_use]
    pub const fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. } | Self::Cancelled)
    }
}
