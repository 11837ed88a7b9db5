//! The checkout controller.
//!
//! [`Checkout`] owns the wallet session, the latest balance snapshot and the
//! payment engine, and runs the whole flow for one plan:
//!
//! ```text
//! validate -> begin attempt -> guard -> build -> sign -> broadcast -> confirm -> record
//! ```
//!
//! Guards always finish before the transaction is built or the wallet is
//! asked for anything.

use std::sync::Arc;

use calmledger::PaymentError;
use calmledger::attempt::AttemptState;
use calmledger::balance::BalanceSnapshot;
use calmledger::plan::{BillingCycle, CustomerDetails, Plan};
use calmledger::receipt::{PaymentReceipt, ReceiptPlan, ReceiptRecorder};
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

use crate::balance::BalanceOracle;
use crate::chain::{Address, RpcClientLike};
use crate::confirmation::ConfirmationView;
use crate::engine::{EngineConfig, PaymentEngine, SubmissionResult};
use crate::networks::SolanaTokenDeployment;
use crate::transfer::{TransactionBuilder, TransferIntent};
use crate::wallet::{ProviderListing, ProviderRegistry, WalletConnector, WalletSession};

/// Where payments go and how they are made.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutConfig {
    /// Account receiving payments.
    pub recipient: Address,
    /// Token payments are made in.
    pub token: SolanaTokenDeployment,
    /// Compute unit price added to each transfer, if any.
    pub priority_fee_micro_lamports: Option<u64>,
    /// Guard and confirmation tuning.
    pub engine: EngineConfig,
}

/// Drives the payment flow for one user.
#[derive(Debug)]
pub struct Checkout<R> {
    config: CheckoutConfig,
    connector: WalletConnector,
    oracle: BalanceOracle<R>,
    builder: TransactionBuilder<R>,
    engine: PaymentEngine<R>,
    recorder: ReceiptRecorder,
    balances: RwLock<Option<BalanceSnapshot>>,
    last_result: RwLock<Option<SubmissionResult>>,
}

impl<R: RpcClientLike> Checkout<R> {
    /// Creates a checkout with no wallet connected.
    pub fn new(
        rpc: Arc<R>,
        registry: ProviderRegistry,
        recorder: ReceiptRecorder,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            connector: WalletConnector::new(registry),
            oracle: BalanceOracle::new(Arc::clone(&rpc), config.token),
            builder: TransactionBuilder::new(Arc::clone(&rpc))
                .with_priority_fee(config.priority_fee_micro_lamports),
            engine: PaymentEngine::new(rpc, config.engine),
            recorder,
            config,
            balances: RwLock::new(None),
            last_result: RwLock::new(None),
        }
    }

    /// Wallet providers, installed first.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderListing> {
        self.connector.list_providers()
    }

    /// Connects `provider_name` and refreshes balances.
    ///
    /// A failed balance refresh is logged; the session stays open.
    ///
    /// # Errors
    ///
    /// See [`WalletConnector::connect`].
    pub async fn connect(&self, provider_name: &str) -> Result<WalletSession, PaymentError> {
        let session = self.connector.connect(provider_name).await?;
        self.refresh_quietly(&session.address).await;
        Ok(session)
    }

    /// Silently reconnects a provider that already trusts this app.
    pub async fn auto_connect(&self) -> Option<WalletSession> {
        let session = self.connector.auto_connect().await?;
        self.refresh_quietly(&session.address).await;
        Some(session)
    }

    /// Disconnects the wallet and forgets its balances.
    pub async fn disconnect(&self) {
        self.connector.disconnect().await;
        *self.balances.write().await = None;
    }

    /// Current wallet session.
    pub async fn session(&self) -> Option<WalletSession> {
        self.connector.session().await
    }

    /// Last fetched balances of the connected wallet.
    pub async fn balances(&self) -> Option<BalanceSnapshot> {
        *self.balances.read().await
    }

    /// Outcome of the most recent submission.
    pub async fn last_result(&self) -> Option<SubmissionResult> {
        self.last_result.read().await.clone()
    }

    /// State of the current or most recent payment attempt.
    ///
    /// After a payment cancelled while the wallet was deciding this still
    /// reads [`AttemptState::AwaitingSignature`]. Check [`Self::is_paying`]
    /// before showing it as live.
    #[must_use]
    pub fn attempt_state(&self) -> AttemptState {
        self.engine.state()
    }

    /// Whether a payment is in flight.
    #[must_use]
    pub fn is_paying(&self) -> bool {
        self.engine.is_busy()
    }

    /// Subscribes to payment attempt states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AttemptState> {
        self.engine.subscribe()
    }

    /// Re-reads balances of the connected wallet.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotConnected`] without a session, or
    /// [`PaymentError::NetworkError`] if the chain cannot be read.
    pub async fn refresh_balances(&self) -> Result<BalanceSnapshot, PaymentError> {
        let session = self.session().await.ok_or(PaymentError::NotConnected)?;
        let snapshot = self.oracle.fetch_balances(&session.address).await?;
        *self.balances.write().await = Some(snapshot);
        Ok(snapshot)
    }

    async fn refresh_quietly(&self, _address: &Address) {
        if let Err(_e) = self.refresh_balances().await {
            #[cfg(feature = "telemetry")]
            tracing::warn!(address = %_address, error = %_e, "balance refresh failed");
        }
    }

    /// Pays for `plan` from the connected wallet and records the receipt.
    ///
    /// The receipt price is taken from the transfer amount, so it always
    /// matches what moved on chain. A receipt that cannot be stored is logged
    /// and the receipt is still returned.
    ///
    /// # Errors
    ///
    /// Any [`PaymentError`]. [`PaymentError::ConfirmationTimeout`] and
    /// [`PaymentError::Cancelled`] mean the outcome is unknown, not failed.
    pub async fn pay(
        &self,
        plan: &Plan,
        billing_cycle: BillingCycle,
        customer: &CustomerDetails,
        cancel: &CancellationToken,
    ) -> Result<PaymentReceipt, PaymentError> {
        customer.validate()?;
        let session = self.session().await.ok_or(PaymentError::NotConnected)?;
        let mut attempt = self.engine.begin()?;

        let intent = TransferIntent::for_price(
            session.address,
            self.config.recipient,
            self.config.token,
            &plan.price,
        )
        .map_err(|e| attempt.abort(e))?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            plan = %plan.title,
            billing_cycle = %billing_cycle,
            amount = %intent.display_amount(),
            payer = %intent.payer(),
            "starting payment"
        );

        attempt.start_guarding()?;
        let balances = self
            .oracle
            .fetch_balances(intent.payer())
            .await
            .map_err(|e| attempt.abort(e))?;
        *self.balances.write().await = Some(balances);
        attempt.guard(&intent, &balances)?;

        let built = self
            .builder
            .build(&intent)
            .await
            .map_err(|e| attempt.abort(e))?;
        let wallet = self
            .connector
            .provider(&session.provider_name)
            .ok_or_else(|| attempt.abort(PaymentError::NotConnected))?;

        let submitted = attempt
            .submit(wallet.as_ref(), built.transaction, cancel)
            .await;
        let SubmissionResult::Pending(signature) = self.track(submitted).await? else {
            return Err(attempt.abort(PaymentError::BroadcastFailed(
                "no signature returned for the broadcast".to_owned(),
            )));
        };
        let confirmed = attempt
            .await_confirmation(signature, &built.blockhash, cancel)
            .await;
        let SubmissionResult::Confirmed { signature, .. } = self.track(confirmed).await? else {
            return Err(attempt.abort(PaymentError::ConfirmationTimeout {
                signature: signature.to_string(),
            }));
        };
        drop(attempt);

        let receipt = PaymentReceipt::new(
            signature.to_string(),
            ReceiptPlan {
                title: plan.title.clone(),
                price: intent.display_amount(),
                billing_cycle,
            },
            customer,
        );
        if let Err(_e) = self.recorder.record(&receipt) {
            #[cfg(feature = "telemetry")]
            tracing::error!(signature = %receipt.transaction_signature, error = %_e, "failed to store receipt");
        }
        self.refresh_quietly(intent.payer()).await;
        Ok(receipt)
    }

    /// Remembers the outcome of a submission step. Unknown outcomes keep the
    /// pending signature visible.
    async fn track(
        &self,
        step: Result<SubmissionResult, PaymentError>,
    ) -> Result<SubmissionResult, PaymentError> {
        let result = match &step {
            Ok(result) => result.clone(),
            Err(err) if err.is_outcome_unknown() => return step,
            Err(err) => SubmissionResult::Failed(err.to_string()),
        };
        *self.last_result.write().await = Some(result);
        step
    }

    /// The stored receipt, if any.
    #[must_use]
    pub fn receipt(&self) -> Option<PaymentReceipt> {
        self.recorder.read()
    }

    /// Confirmation page for the stored receipt, or `None` when the user
    /// should be sent back to the start of the flow.
    #[must_use]
    pub fn confirmation(&self) -> Option<ConfirmationView> {
        self.receipt()
            .map(|receipt| ConfirmationView::new(&receipt, self.config.token.network))
    }

    /// Leaves the confirmation page: the stored receipt is removed.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Storage`] if the receipt cannot be removed.
    pub fn back_home(&self) -> Result<(), PaymentError> {
        self.recorder.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRpc, confirmed_ok, gated_wallet, usdc, wallet};
    use calmledger::receipt::MemoryReceiptStore;
    use rust_decimal::Decimal;
    use solana_pubkey::Pubkey;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const SOL: u64 = 1_000_000_000;
    const USDC: u64 = 1_000_000;

    fn customer() -> CustomerDetails {
        CustomerDetails {
            email: "client@example.com".to_owned(),
            is_anonymous: false,
        }
    }

    fn plan(price: &str) -> Plan {
        Plan::new("CUSTOM FEE", price, "")
    }

    fn checkout(rpc: &Arc<MockRpc>, registry: ProviderRegistry) -> Checkout<MockRpc> {
        let recipient: Address = Pubkey::new_unique().into();
        rpc.fund_token(&recipient, 0);
        Checkout::new(
            Arc::clone(rpc),
            registry,
            ReceiptRecorder::new(MemoryReceiptStore::new()),
            CheckoutConfig {
                recipient,
                token: usdc(),
                priority_fee_micro_lamports: None,
                engine: EngineConfig {
                    poll_interval: Duration::from_millis(1),
                    ..EngineConfig::default()
                },
            },
        )
    }

    async fn connected(
        rpc: &Arc<MockRpc>,
        native: u64,
        token: Option<u64>,
    ) -> (Checkout<MockRpc>, Address) {
        let checkout = checkout(rpc, ProviderRegistry::new().with_provider(wallet("Local")));
        let session = checkout.connect("Local").await.unwrap();
        rpc.set_native(&session.address, native);
        if let Some(amount) = token {
            rpc.fund_token(&session.address, amount);
        }
        checkout.refresh_balances().await.unwrap();
        (checkout, session.address)
    }

    #[tokio::test]
    async fn test_pay_requires_connection_and_email() {
        let rpc = Arc::new(MockRpc::new());
        let checkout = checkout(&rpc, ProviderRegistry::new());
        let cancel = CancellationToken::new();
        assert!(matches!(
            checkout.pay(&plan("1"), BillingCycle::Session, &customer(), &cancel).await,
            Err(PaymentError::NotConnected)
        ));
        let blank = CustomerDetails {
            email: String::new(),
            is_anonymous: true,
        };
        assert!(matches!(
            checkout.pay(&plan("1"), BillingCycle::Session, &blank, &cancel).await,
            Err(PaymentError::MissingField("email"))
        ));
    }

    #[tokio::test]
    async fn test_happy_path_records_receipt_with_intent_amount() {
        let rpc = Arc::new(MockRpc::new());
        rpc.push_status(Ok(None));
        rpc.push_status(Ok(Some(confirmed_ok())));
        let (checkout, _) = connected(&rpc, 2 * SOL / 100, Some(350 * USDC)).await;

        let receipt = checkout
            .pay(
                &plan("350"),
                BillingCycle::Monthly,
                &customer(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let sent = rpc.sent();
        assert_eq!(sent.len(), 1);
        // both accounts exist: the transfer is the only instruction
        assert_eq!(sent[0].message.instructions().len(), 1);
        assert_eq!(receipt.transaction_signature, sent[0].signatures[0].to_string());
        assert_eq!(receipt.plan.price, "350");
        assert_eq!(receipt.plan.billing_cycle, BillingCycle::Monthly);
        assert_eq!(checkout.receipt(), Some(receipt.clone()));
        assert_eq!(checkout.attempt_state(), AttemptState::Confirmed);
        assert!(matches!(
            checkout.last_result().await,
            Some(SubmissionResult::Confirmed { slot: 42, .. })
        ));

        let view = checkout.confirmation().unwrap();
        assert_eq!(view.amount_line, "$350 USDC");
        checkout.back_home().unwrap();
        assert!(checkout.confirmation().is_none());
    }

    #[tokio::test]
    async fn test_empty_token_account_fails_before_wallet() {
        let rpc = Arc::new(MockRpc::new());
        let (gated, _decide) = gated_wallet("Local");
        let checkout = checkout(&rpc, ProviderRegistry::new().with_provider(gated));
        let session = checkout.connect("Local").await.unwrap();
        rpc.set_native(&session.address, SOL);

        let err = checkout
            .pay(
                &plan("200"),
                BillingCycle::Session,
                &customer(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            PaymentError::InsufficientFunds {
                required,
                available,
            } => {
                assert_eq!(required, Decimal::from(200));
                assert_eq!(available, Decimal::ZERO);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // the gated wallet would block forever if it had been asked to sign
        assert!(rpc.sent().is_empty());
        assert_eq!(checkout.attempt_state(), AttemptState::Failed);
    }

    #[tokio::test]
    async fn test_low_fee_reserve_builds_nothing() {
        let rpc = Arc::new(MockRpc::new());
        let (checkout, _) = connected(&rpc, 5 * SOL / 1000, Some(350 * USDC)).await;
        let blockhashes_before = rpc.blockhash_requests.load(Ordering::SeqCst);

        let err = checkout
            .pay(
                &plan("350"),
                BillingCycle::Monthly,
                &customer(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            PaymentError::InsufficientFeeReserve {
                required,
                available,
            } => {
                assert_eq!(required, Decimal::new(1, 2));
                assert_eq!(available, Decimal::new(5, 3));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(rpc.blockhash_requests.load(Ordering::SeqCst), blockhashes_before);
        assert!(rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_blockhash_records_nothing() {
        let rpc = Arc::new(MockRpc::new());
        rpc.blockhash_ttl(2);
        let (checkout, _) = connected(&rpc, SOL, Some(500 * USDC)).await;

        let err = checkout
            .pay(
                &plan("400"),
                BillingCycle::Monthly,
                &customer(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ConfirmationTimeout { .. }));
        assert!(!err.user_message().to_lowercase().contains("failed"));
        assert_eq!(checkout.attempt_state(), AttemptState::Failed);
        assert!(checkout.receipt().is_none());
        assert_eq!(rpc.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_payment_is_rejected() {
        let rpc = Arc::new(MockRpc::new());
        rpc.push_status(Ok(Some(confirmed_ok())));
        let (gated, decide) = gated_wallet("Local");
        let checkout = Arc::new(checkout(&rpc, ProviderRegistry::new().with_provider(gated)));
        let session = checkout.connect("Local").await.unwrap();
        rpc.set_native(&session.address, SOL);
        rpc.fund_token(&session.address, 1_000 * USDC);

        let mut states = checkout.subscribe();
        let first = tokio::spawn({
            let checkout = Arc::clone(&checkout);
            async move {
                checkout
                    .pay(
                        &plan("150"),
                        BillingCycle::Session,
                        &customer(),
                        &CancellationToken::new(),
                    )
                    .await
            }
        });
        states
            .wait_for(|s| *s == AttemptState::AwaitingSignature)
            .await
            .unwrap();
        assert!(checkout.is_paying());

        assert!(matches!(
            checkout
                .pay(
                    &plan("150"),
                    BillingCycle::Session,
                    &customer(),
                    &CancellationToken::new()
                )
                .await,
            Err(PaymentError::AttemptInProgress)
        ));

        decide.send(true).unwrap();
        let receipt = first.await.unwrap().unwrap();
        assert_eq!(receipt.plan.price, "150");
        assert_eq!(rpc.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_signature_wait_is_not_live() {
        let rpc = Arc::new(MockRpc::new());
        let (gated, _decide) = gated_wallet("Local");
        let checkout = Arc::new(checkout(&rpc, ProviderRegistry::new().with_provider(gated)));
        let session = checkout.connect("Local").await.unwrap();
        rpc.set_native(&session.address, SOL);
        rpc.fund_token(&session.address, 1_000 * USDC);

        let cancel = CancellationToken::new();
        let mut states = checkout.subscribe();
        let paying = tokio::spawn({
            let checkout = Arc::clone(&checkout);
            let cancel = cancel.clone();
            async move {
                checkout
                    .pay(&plan("150"), BillingCycle::Session, &customer(), &cancel)
                    .await
            }
        });
        states
            .wait_for(|s| *s == AttemptState::AwaitingSignature)
            .await
            .unwrap();
        cancel.cancel();

        let err = paying.await.unwrap().unwrap_err();
        assert!(matches!(err, PaymentError::Cancelled));
        assert_eq!(checkout.attempt_state(), AttemptState::AwaitingSignature);
        assert!(!checkout.is_paying());
        assert!(rpc.sent().is_empty());
        assert!(checkout.receipt().is_none());
    }

    #[tokio::test]
    async fn test_rejected_signature_fails_attempt() {
        let rpc = Arc::new(MockRpc::new());
        let (gated, decide) = gated_wallet("Local");
        let checkout = checkout(&rpc, ProviderRegistry::new().with_provider(gated));
        let session = checkout.connect("Local").await.unwrap();
        rpc.set_native(&session.address, SOL);
        rpc.fund_token(&session.address, 1_000 * USDC);
        decide.send(false).unwrap();

        let err = checkout
            .pay(
                &plan("150"),
                BillingCycle::Session,
                &customer(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::UserRejected));
        assert_eq!(checkout.attempt_state(), AttemptState::Failed);
        assert!(matches!(
            checkout.last_result().await,
            Some(SubmissionResult::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_clears_session_and_balances() {
        let rpc = Arc::new(MockRpc::new());
        let (checkout, _) = connected(&rpc, SOL, None).await;
        assert!(checkout.balances().await.is_some());
        checkout.disconnect().await;
        checkout.disconnect().await;
        assert!(checkout.session().await.is_none());
        assert!(checkout.balances().await.is_none());
    }
}
