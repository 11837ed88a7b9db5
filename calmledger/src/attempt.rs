//! Payment attempt state machine.
//!
//! A payment attempt walks a fixed path:
//!
//! ```text
//! Idle -> Guarding -> AwaitingSignature -> Broadcasting -> Confirming -> Confirmed
//!                 \___________________\______________\____________\--> Failed
//! ```
//!
//! `Confirmed` and `Failed` are terminal. A retry is a new attempt that starts
//! again from `Idle` with a freshly built transaction.
//!
//! [`AttemptGate`] owns a single permit. [`AttemptGate::try_begin`] hands it to
//! one [`AttemptTicket`] at a time; a second caller is rejected with
//! [`PaymentError::AttemptInProgress`] rather than queued. Dropping the ticket
//! (after `Confirmed`, `Failed`, or a cancelled wait) returns the permit.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};

use crate::error::PaymentError;

/// Where a payment attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    /// Nothing has happened yet.
    Idle,
    /// Balances are being checked against the intent.
    Guarding,
    /// Waiting for the wallet to sign.
    AwaitingSignature,
    /// The signed transaction is being sent to the network.
    Broadcasting,
    /// Waiting for the network to confirm the transaction.
    Confirming,
    /// The transaction reached the confirmed commitment level.
    Confirmed,
    /// The attempt ended without a confirmed transaction.
    Failed,
}

impl AttemptState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// The state that follows on the success path.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Guarding),
            Self::Guarding => Some(Self::AwaitingSignature),
            Self::AwaitingSignature => Some(Self::Broadcasting),
            Self::Broadcasting => Some(Self::Confirming),
            Self::Confirming => Some(Self::Confirmed),
            Self::Confirmed | Self::Failed => None,
        }
    }

    /// Whether `self -> to` is a legal move.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if to == Self::Failed {
            return !self.is_terminal();
        }
        self.successor() == Some(to)
    }
}

/// Single-permit gate that serializes payment attempts.
#[derive(Debug)]
pub struct AttemptGate {
    permit: Arc<Semaphore>,
    state: Arc<watch::Sender<AttemptState>>,
}

impl Default for AttemptGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(AttemptState::Idle);
        Self {
            permit: Arc::new(Semaphore::new(1)),
            state: Arc::new(state),
        }
    }

    /// Starts a new attempt if none is in flight.
    ///
    /// The published state is reset to [`AttemptState::Idle`] for the new
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::AttemptInProgress`] while another ticket is alive.
    pub fn try_begin(&self) -> Result<AttemptTicket, PaymentError> {
        let permit = Arc::clone(&self.permit)
            .try_acquire_owned()
            .map_err(|_| PaymentError::AttemptInProgress)?;
        self.state.send_replace(AttemptState::Idle);
        Ok(AttemptTicket {
            _permit: permit,
            state: Arc::clone(&self.state),
            current: AttemptState::Idle,
        })
    }

    /// State of the current or most recent attempt.
    #[must_use]
    pub fn state(&self) -> AttemptState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AttemptState> {
        self.state.subscribe()
    }

    /// Whether an attempt currently holds the permit.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

/// Exclusive handle on one payment attempt.
#[derive(Debug)]
pub struct AttemptTicket {
    _permit: OwnedSemaphorePermit,
    state: Arc<watch::Sender<AttemptState>>,
    current: AttemptState,
}

impl AttemptTicket {
    /// Current state of this attempt.
    #[must_use]
    pub const fn state(&self) -> AttemptState {
        self.current
    }

    /// Moves the attempt to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidTransition`] if `to` does not follow the
    /// current state.
    pub fn advance(&mut self, to: AttemptState) -> Result<(), PaymentError> {
        if !self.current.can_transition_to(to) {
            return Err(PaymentError::InvalidTransition {
                from: self.current,
                to,
            });
        }
        #[cfg(feature = "telemetry")]
        tracing::debug!(from = ?self.current, to = ?to, "payment attempt transition");
        self.current = to;
        self.state.send_replace(to);
        Ok(())
    }

    /// Moves the attempt to [`AttemptState::Failed`] unless it already ended.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            #[cfg(feature = "telemetry")]
            tracing::debug!(from = ?self.current, "payment attempt failed");
            self.current = AttemptState::Failed;
            self.state.send_replace(AttemptState::Failed);
        }
    }
}
