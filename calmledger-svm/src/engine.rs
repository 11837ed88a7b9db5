//! Guarding, signing, broadcasting and confirming one payment at a time.
//!
//! [`PaymentEngine::begin`] hands out a [`PaymentAttempt`] that owns the
//! engine's only permit. The attempt is driven step by step:
//!
//! 1. [`PaymentAttempt::guard`] checks balances against the intent before any
//!    wallet call or transaction build,
//! 2. [`PaymentAttempt::submit`] has the wallet sign and the RPC node broadcast,
//! 3. [`PaymentAttempt::await_confirmation`] polls until the transaction is
//!    confirmed, fails on chain, or its blockhash expires.
//!
//! Every error moves the attempt to [`AttemptState::Failed`], except a
//! cancellation, which leaves the state where it was. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use calmledger::PaymentError;
use calmledger::attempt::{AttemptGate, AttemptState, AttemptTicket};
use calmledger::balance::BalanceSnapshot;
use rust_decimal::Decimal;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chain::{BlockhashContext, RpcClientLike};
use crate::transfer::TransferIntent;
use crate::wallet::WalletProvider;

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Native balance that must remain available for fees and rent.
    pub fee_reserve: Decimal,
    /// Delay between confirmation polls.
    pub poll_interval: Duration,
    /// Consecutive polling errors after which the outcome is reported unknown.
    pub max_poll_errors: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_reserve: Decimal::new(1, 2),
            poll_interval: Duration::from_secs(1),
            max_poll_errors: 5,
        }
    }
}

/// Outcome of a submission step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    /// Broadcast, not yet confirmed.
    Pending(Signature),
    /// Reached `confirmed` commitment.
    Confirmed {
        /// Transaction signature.
        signature: Signature,
        /// Slot the transaction landed in.
        slot: u64,
    },
    /// Ended without a confirmed transaction.
    Failed(String),
}

/// Serializes payment attempts against one RPC node.
#[derive(Debug)]
pub struct PaymentEngine<R> {
    rpc: Arc<R>,
    config: EngineConfig,
    gate: AttemptGate,
}

impl<R: RpcClientLike> PaymentEngine<R> {
    /// Creates an idle engine.
    #[must_use]
    pub fn new(rpc: Arc<R>, config: EngineConfig) -> Self {
        Self {
            rpc,
            config,
            gate: AttemptGate::new(),
        }
    }

    /// Engine tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// State of the current or most recent attempt.
    ///
    /// An attempt cancelled while the wallet was deciding keeps publishing
    /// [`AttemptState::AwaitingSignature`] after it is dropped. Use
    /// [`Self::is_busy`] to tell whether an attempt is still alive.
    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.gate.state()
    }

    /// Whether an attempt is alive.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Subscribes to attempt state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AttemptState> {
        self.gate.subscribe()
    }

    /// Starts a new attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::AttemptInProgress`] while another attempt is
    /// alive. The caller is rejected, not queued.
    pub fn begin(&self) -> Result<PaymentAttempt<'_, R>, PaymentError> {
        let ticket = self.gate.try_begin()?;
        Ok(PaymentAttempt {
            engine: self,
            ticket,
            guarded: false,
        })
    }
}

/// Checks `balances` against `intent` and the fee reserve.
///
/// The token check runs first; a missing token account counts as zero.
///
/// # Errors
///
/// [`PaymentError::InsufficientFunds`] or
/// [`PaymentError::InsufficientFeeReserve`].
pub fn check_balances(
    intent: &TransferIntent,
    balances: &BalanceSnapshot,
    fee_reserve: Decimal,
) -> Result<(), PaymentError> {
    let required = intent.amount();
    let available = balances.token_balance_or_zero();
    if available < required {
        return Err(PaymentError::InsufficientFunds {
            required,
            available,
        });
    }
    if balances.native_balance < fee_reserve {
        return Err(PaymentError::InsufficientFeeReserve {
            required: fee_reserve,
            available: balances.native_balance,
        });
    }
    Ok(())
}

/// One payment attempt. Dropping it frees the engine.
#[derive(Debug)]
pub struct PaymentAttempt<'a, R> {
    engine: &'a PaymentEngine<R>,
    ticket: AttemptTicket,
    guarded: bool,
}

impl<R: RpcClientLike> PaymentAttempt<'_, R> {
    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AttemptState {
        self.ticket.state()
    }

    /// Ends the attempt with `err`, returning it for propagation.
    pub fn abort(&mut self, err: PaymentError) -> PaymentError {
        if !matches!(err, PaymentError::Cancelled) {
            self.ticket.fail();
        }
        #[cfg(feature = "telemetry")]
        tracing::warn!(error = %err, state = ?self.ticket.state(), "payment attempt ended");
        err
    }

    fn step(&mut self, to: AttemptState) -> Result<(), PaymentError> {
        self.ticket.advance(to).map_err(|e| self.abort(e))
    }

    /// Enters [`AttemptState::Guarding`] ahead of the balance read.
    pub(crate) fn start_guarding(&mut self) -> Result<(), PaymentError> {
        self.step(AttemptState::Guarding)
    }

    /// Runs the balance guards. Only an attempt whose guards passed can be
    /// submitted.
    ///
    /// # Errors
    ///
    /// See [`check_balances`]. [`PaymentError::InvalidTransition`] if the
    /// attempt is neither idle nor guarding. The attempt fails on any error.
    pub fn guard(
        &mut self,
        intent: &TransferIntent,
        balances: &BalanceSnapshot,
    ) -> Result<(), PaymentError> {
        match self.ticket.state() {
            AttemptState::Idle => self.start_guarding()?,
            AttemptState::Guarding => {}
            from => {
                return Err(self.abort(PaymentError::InvalidTransition {
                    from,
                    to: AttemptState::Guarding,
                }));
            }
        }
        check_balances(intent, balances, self.engine.config.fee_reserve)
            .map_err(|e| self.abort(e))?;
        self.guarded = true;
        Ok(())
    }

    /// Has `wallet` sign `transaction`, then broadcasts it.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::InvalidTransition`] unless [`Self::guard`] passed.
    ///   The wallet is not asked.
    /// - [`PaymentError::Cancelled`] if `cancel` fires while the wallet is
    ///   still deciding. The state stays at `AwaitingSignature`.
    /// - [`PaymentError::UserRejected`] if the wallet declines.
    /// - [`PaymentError::BroadcastFailed`] if the node refuses the transaction.
    pub async fn submit(
        &mut self,
        wallet: &dyn WalletProvider,
        transaction: VersionedTransaction,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, PaymentError> {
        if !self.guarded {
            let from = self.ticket.state();
            return Err(self.abort(PaymentError::InvalidTransition {
                from,
                to: AttemptState::AwaitingSignature,
            }));
        }
        self.step(AttemptState::AwaitingSignature)?;
        let signed = tokio::select! {
            () = cancel.cancelled() => return Err(self.abort(PaymentError::Cancelled)),
            signed = wallet.sign_transaction(transaction) => {
                signed.map_err(|e| self.abort(e.into()))?
            }
        };

        self.step(AttemptState::Broadcasting)?;
        let signature = self
            .engine
            .rpc
            .send_transaction(&signed)
            .await
            .map_err(|e| self.abort(PaymentError::BroadcastFailed(e.to_string())))?;
        #[cfg(feature = "telemetry")]
        tracing::info!(%signature, "transaction broadcast");
        Ok(SubmissionResult::Pending(signature))
    }

    /// Polls until `signature` is confirmed.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::ExecutionReverted`] if the transaction failed on chain.
    /// - [`PaymentError::ConfirmationTimeout`] once the chain passes the
    ///   blockhash's last valid block height, or after too many consecutive
    ///   polling errors. The transaction may still land.
    /// - [`PaymentError::Cancelled`] if `cancel` fires. Only local polling
    ///   stops; the signature is logged so the payment can be looked up.
    pub async fn await_confirmation(
        &mut self,
        signature: Signature,
        blockhash: &BlockhashContext,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, PaymentError> {
        self.step(AttemptState::Confirming)?;
        let config = self.engine.config;
        let timeout = || PaymentError::ConfirmationTimeout {
            signature: signature.to_string(),
        };
        let mut poll_errors = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled_while_confirming(&signature));
            }
            match self.poll_once(&signature, blockhash).await {
                Ok(Some(slot)) => {
                    self.step(AttemptState::Confirmed)?;
                    #[cfg(feature = "telemetry")]
                    tracing::info!(%signature, slot, "transaction confirmed");
                    return Ok(SubmissionResult::Confirmed { signature, slot });
                }
                Ok(None) => poll_errors = 0,
                Err(PollError::Fatal(err)) => return Err(self.abort(err)),
                Err(PollError::Expired) => return Err(self.abort(timeout())),
                Err(PollError::Transient(_reason)) => {
                    poll_errors += 1;
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(%signature, attempt = poll_errors, reason = %_reason, "confirmation poll failed");
                    if poll_errors >= config.max_poll_errors {
                        return Err(self.abort(timeout()));
                    }
                }
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(self.cancelled_while_confirming(&signature));
                }
                () = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }

    fn cancelled_while_confirming(&mut self, _signature: &Signature) -> PaymentError {
        #[cfg(feature = "telemetry")]
        tracing::warn!(signature = %_signature, "stopped waiting for confirmation; the transaction may still land");
        self.abort(PaymentError::Cancelled)
    }

    async fn poll_once(
        &self,
        signature: &Signature,
        blockhash: &BlockhashContext,
    ) -> Result<Option<u64>, PollError> {
        let rpc = &self.engine.rpc;
        let status = rpc
            .get_signature_status(signature)
            .await
            .map_err(|e| PollError::Transient(e.to_string()))?;
        if let Some(status) = status
            && status.confirmed
        {
            return match status.err {
                Some(reason) => Err(PollError::Fatal(PaymentError::ExecutionReverted(reason))),
                None => Ok(Some(status.slot)),
            };
        }
        let height = rpc
            .get_block_height()
            .await
            .map_err(|e| PollError::Transient(e.to_string()))?;
        if blockhash.is_expired_at(height) {
            return Err(PollError::Expired);
        }
        Ok(None)
    }
}

enum PollError {
    Transient(String),
    Expired,
    Fatal(PaymentError),
}
