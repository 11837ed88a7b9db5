//! Plans, billing cycles and the customer details collected at checkout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// How often a plan is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    /// A single session.
    Session,
    /// Billed weekly.
    Weekly,
    /// Billed monthly.
    Monthly,
    /// Billed yearly.
    Yearly,
}

impl BillingCycle {
    /// All cycles in display order.
    pub const ALL: [Self; 4] = [Self::Session, Self::Weekly, Self::Monthly, Self::Yearly];

    /// Lowercase wire name, as stored in receipts.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// What happens after a confirmed payment for this cycle.
    #[must_use]
    pub const fn next_steps(&self) -> &'static [&'static str] {
        match self {
            Self::Session => &[
                "Check your email for session scheduling instructions",
                "You'll receive a calendar link within 24 hours",
                "Prepare any questions or topics you'd like to discuss",
                "Ensure you have a stable internet connection for video calls",
            ],
            Self::Monthly => &[
                "Check your email for your monthly plan welcome package",
                "You'll receive scheduling links for all 4 sessions this month",
                "Access to 24/7 crisis support will be activated within 2 hours",
                "Your first session can be scheduled immediately",
            ],
            Self::Yearly => &[
                "Welcome to your annual wellness program!",
                "Check your email for your comprehensive plan details",
                "All 48 sessions are now available for scheduling",
                "Your dedicated therapist will contact you within 48 hours",
                "Quarterly progress reviews will be automatically scheduled",
            ],
            Self::Weekly => &[
                "Check your email for further instructions",
                "You'll receive a calendar link within 24 hours",
            ],
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a billing cycle name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown billing cycle {0:?}")]
pub struct UnknownBillingCycle(pub String);

impl FromStr for BillingCycle {
    type Err = UnknownBillingCycle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" | "annual" => Ok(Self::Yearly),
            _ => Err(UnknownBillingCycle(s.to_owned())),
        }
    }
}

/// A purchasable plan as listed on the pricing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Display title, e.g. `"MONTHLY FEE"`.
    pub title: String,
    /// USD price as a decimal string, e.g. `"400"`.
    pub price: String,
    /// Short description shown under the price.
    #[serde(default)]
    pub description: String,
}

impl Plan {
    /// Creates a plan.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        price: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            price: price.into(),
            description: description.into(),
        }
    }

    /// The built-in pricing table.
    #[must_use]
    pub fn catalog() -> Vec<Self> {
        vec![
            Self::new(
                "SESSION FEE",
                "150",
                "Per session fee include free practice book.",
            ),
            Self::new(
                "WEEKLY FEE",
                "300",
                "Weekly session fee include 5% free prices.",
            ),
            Self::new(
                "MONTHLY FEE",
                "400",
                "Monthly session fee include 10% free prices.",
            ),
            Self::new(
                "ANNUAL FEE",
                "1000",
                "Annual session fee include 20% free prices.",
            ),
        ]
    }
}

/// Finds a plan by case-insensitive title or by 1-based position.
#[must_use]
pub fn find_plan<'a>(plans: &'a [Plan], selector: &str) -> Option<&'a Plan> {
    let selector = selector.trim();
    if let Ok(index) = selector.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| plans.get(i));
    }
    plans
        .iter()
        .find(|p| p.title.eq_ignore_ascii_case(selector))
}

/// Contact details entered on the booking form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    /// Where the confirmation is sent.
    pub email: String,
    /// Whether the customer booked without sharing a name.
    #[serde(default)]
    pub is_anonymous: bool,
}

impl CustomerDetails {
    /// Checks that required inputs are present.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MissingField`] if the email is blank.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.email.trim().is_empty() {
            return Err(PaymentError::MissingField("email"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_cycle_wire_names() {
        assert_eq!(
            serde_json::to_string(&BillingCycle::Monthly).unwrap(),
            "\"monthly\""
        );
        assert_eq!("Annual".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert!("fortnightly".parse::<BillingCycle>().is_err());
    }

    #[test]
    fn test_next_steps_per_cycle() {
        assert_eq!(BillingCycle::Yearly.next_steps().len(), 5);
        assert!(BillingCycle::Session.next_steps()[0].contains("scheduling"));
    }

    #[test]
    fn test_find_plan_by_title_or_index() {
        let plans = Plan::catalog();
        assert_eq!(find_plan(&plans, "monthly fee").unwrap().price, "400");
        assert_eq!(find_plan(&plans, "4").unwrap().title, "ANNUAL FEE");
        assert!(find_plan(&plans, "0").is_none());
        assert!(find_plan(&plans, "9").is_none());
        assert!(find_plan(&plans, "platinum").is_none());
    }

    #[test]
    fn test_customer_presence_check() {
        let blank = CustomerDetails {
            email: "  ".to_owned(),
            is_anonymous: true,
        };
        assert!(matches!(
            blank.validate(),
            Err(PaymentError::MissingField("email"))
        ));
        let ok = CustomerDetails {
            email: "client@example.com".to_owned(),
            is_anonymous: false,
        };
        assert!(ok.validate().is_ok());
    }
}
