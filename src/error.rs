use uuid::Uuid;
use thiserror::Error;

use crate::models::plan::BillingCycle;
use crate::models::subscription::SubscriptionStatus;

/// Result type alias for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("No active price for plan {plan_code} with {cycle} billing")]
    PriceNotFound { plan_code: String, cycle: BillingCycle },

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("Payment attempt not found: {0}")]
    PaymentAttemptNotFound(Uuid),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Account {0} already has a subscription")]
    AlreadySubscribed(Uuid),

    #[error("Cannot {operation} a subscription in status {status:?}")]
    InvalidStateTransition {
        operation: &'static str,
        status: SubscriptionStatus,
    },

    #[error("Invalid tier change from tier {from} to tier {to}")]
    InvalidTierChange { from: i32, to: i32 },

    #[error("Cannot void a paid invoice: {0}")]
    CannotVoidPaidInvoice(Uuid),

    #[error("Configuration error: {0}")]
    Config(String),
}
