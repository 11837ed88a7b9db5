//! What the confirmation page shows for a stored receipt.

use calmledger::plan::BillingCycle;
use calmledger::receipt::PaymentReceipt;
use serde::Serialize;

use crate::networks::SolanaNetwork;

/// Characters kept at each end of a shortened signature.
const SHORT_SIGNATURE_EDGE: usize = 8;

/// Display data for a confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationView {
    /// Full transaction signature.
    pub signature: String,
    /// `first8...last8` form of the signature.
    pub short_signature: String,
    /// Block explorer link for the transaction.
    pub explorer_url: String,
    /// Amount paid, e.g. `"$400 USDC"`.
    pub amount_line: String,
    /// Plan title.
    pub plan_title: String,
    /// Billing cycle paid for.
    pub billing_cycle: BillingCycle,
    /// Where the confirmation email goes.
    pub email: String,
    /// Whether the customer booked anonymously.
    pub is_anonymous: bool,
    /// What the customer should expect next.
    pub next_steps: Vec<String>,
}

impl ConfirmationView {
    /// Builds the view for `receipt` on `network`.
    #[must_use]
    pub fn new(receipt: &PaymentReceipt, network: SolanaNetwork) -> Self {
        let signature = receipt.transaction_signature.clone();
        Self {
            short_signature: shorten(&signature),
            explorer_url: network.explorer_tx_url(&signature),
            amount_line: format!("${} USDC", receipt.plan.price),
            plan_title: receipt.plan.title.clone(),
            billing_cycle: receipt.plan.billing_cycle,
            email: receipt.user_email.clone(),
            is_anonymous: receipt.is_anonymous,
            next_steps: receipt
                .plan
                .billing_cycle
                .next_steps()
                .iter()
                .map(|step| (*step).to_owned())
                .collect(),
            signature,
        }
    }
}

fn shorten(signature: &str) -> String {
    let chars: Vec<char> = signature.chars().collect();
    if chars.len() <= SHORT_SIGNATURE_EDGE * 2 {
        return signature.to_owned();
    }
    let head: String = chars[..SHORT_SIGNATURE_EDGE].iter().collect();
    let tail: String = chars[chars.len() - SHORT_SIGNATURE_EDGE..].iter().collect();
    format!("{head}...{tail}")
}
