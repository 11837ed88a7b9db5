//! Solana chain plumbing for the checkout.
//!
//! - [`Address`] - a base58-encoded Solana public key
//! - [`RpcClientLike`] - the RPC calls the payment flow needs, implemented
//!   for the nonblocking [`RpcClient`](solana_client::nonblocking::rpc_client::RpcClient)
//! - [`BlockhashContext`] - the blockhash a transaction was built against and
//!   the last block height at which it can still land

/// Core Solana chain types.
pub mod types;
pub use types::*;

/// RPC client abstraction for Solana.
pub mod rpc;
pub use rpc::{BlockhashContext, RpcClientLike, RpcError, SignatureStatus};
