#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the calmledger checkout.
//!
//! This crate holds everything in the payment flow that does not depend on a
//! particular blockchain: decimal price handling, the plan catalog, the error
//! taxonomy, the single-attempt state machine and the local receipt slot.
//! Chain-specific pieces (RPC, wallets, transaction building) live in
//! `calmledger-svm`.
//!
//! # Modules
//!
//! - [`amount`] - Decimal price strings to token minor units and back
//! - [`attempt`] - Payment attempt state machine and the single-attempt gate
//! - [`balance`] - Balance snapshot shared by the oracle and the guards
//! - [`error`] - Payment error taxonomy and user-facing messages
//! - [`plan`] - Plans, billing cycles and customer details
//! - [`receipt`] - Receipt record, storage slot and recorder
//! - [`timestamp`] - Unix timestamps used in receipts
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod amount;
pub mod attempt;
pub mod balance;
pub mod error;
pub mod plan;
pub mod receipt;
pub mod timestamp;

pub use error::PaymentError;
