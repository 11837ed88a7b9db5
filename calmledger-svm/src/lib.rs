#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana USDC checkout.
//!
//! Everything needed to take a payment for a plan in USDC from a user's
//! wallet: connecting a wallet provider, reading balances, building the
//! transfer, having the wallet sign it, broadcasting, waiting for
//! confirmation and recording the receipt.
//!
//! # Modules
//!
//! - [`chain`] - Addresses and the RPC surface the checkout needs
//! - [`networks`] - Known networks and their USDC deployments
//! - [`wallet`] - Wallet providers, the provider registry and the connector
//! - [`balance`] - Native and token balance reads
//! - [`transfer`] - Transfer intents and unsigned transaction building
//! - [`engine`] - Balance guards, submission and confirmation polling
//! - [`checkout`] - The controller tying the flow together
//! - [`confirmation`] - Confirmation page data for a stored receipt
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use calmledger::plan::{BillingCycle, CustomerDetails, Plan};
//! use calmledger::receipt::{FileReceiptStore, ReceiptRecorder};
//! use calmledger_svm::checkout::{Checkout, CheckoutConfig};
//! use calmledger_svm::engine::EngineConfig;
//! use calmledger_svm::networks::SolanaNetwork;
//! use calmledger_svm::wallet::{KeypairWallet, ProviderRegistry};
//!
//! let network = SolanaNetwork::Devnet;
//! let rpc = Arc::new(solana_client::nonblocking::rpc_client::RpcClient::new(
//!     network.default_rpc_url().to_owned(),
//! ));
//! let registry = ProviderRegistry::new()
//!     .with_provider(KeypairWallet::from_file("Local", "wallet.json")?)
//!     .with_known_wallets();
//! let checkout = Checkout::new(
//!     rpc,
//!     registry,
//!     ReceiptRecorder::new(FileReceiptStore::new(".calmledger")),
//!     CheckoutConfig {
//!         recipient: "7gRY3UxGJGVy6jrvqKNLYyYwUkU9ZuBFmXg2Rm5VSrUH".parse()?,
//!         token: network.usdc(),
//!         priority_fee_micro_lamports: None,
//!         engine: EngineConfig::default(),
//!     },
//! );
//! checkout.connect("Local").await?;
//! let receipt = checkout
//!     .pay(&Plan::catalog()[2], BillingCycle::Monthly, &customer, &cancel)
//!     .await?;
//! ```

pub mod balance;
pub mod chain;
pub mod checkout;
pub mod confirmation;
pub mod engine;
pub mod networks;
pub mod transfer;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use checkout::{Checkout, CheckoutConfig};
pub use networks::{SolanaNetwork, SolanaTokenDeployment};
