use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use rust_decimal::Decimal;

use crate::models::plan::{BillingCycle, Plan, Price};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionStatus {
    PendingPayment,
    Trial,
    Active,
    PastDue,
    Suspended,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    /// Whether the account can still use the product in this status.
    pub fn has_access(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trial | SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }

    pub fn can_renew(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue | SubscriptionStatus::Suspended
        )
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trial
                | SubscriptionStatus::Active
                | SubscriptionStatus::PastDue
                | SubscriptionStatus::Suspended
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

/// The mutable aggregate root. Exactly zero or one per account; mutated only
/// through `SubscriptionLifecycle` operations and never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan_code: String,
    pub plan_name: String,
    pub price_amount: Decimal,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// Set only while PastDue.
    pub grace_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub auto_renew: bool,
    /// Pending downgrade, applied at the next renewal.
    pub downgrade_to_plan: Option<String>,
    pub downgrade_to_cycle: Option<BillingCycle>,
    pub downgrade_to_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a trial subscription. The trial window and the first billing
    /// period are the same window.
    pub fn new(
        account_id: Uuid,
        plan: &Plan,
        price: &Price,
        cycle: BillingCycle,
        trial_days: i64,
    ) -> Self {
        let now = Utc::now();
        let trial_end = now + Duration::days(trial_days);
        Self {
            id: Uuid::new_v4(),
            account_id,
            plan_code: plan.code.clone(),
            plan_name: plan.name.clone(),
            price_amount: price.amount,
            currency: price.currency.clone(),
            status: SubscriptionStatus::Trial,
            billing_cycle: cycle,
            trial_start: Some(now),
            trial_end: Some(trial_end),
            current_period_start: now,
            current_period_end: trial_end,
            grace_period_end: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            cancellation_reason: None,
            auto_renew: true,
            downgrade_to_plan: None,
            downgrade_to_cycle: None,
            downgrade_to_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_in_trial(&self) -> bool {
        self.status == SubscriptionStatus::Trial
    }

    pub fn is_in_grace_period(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::PastDue
            && self.grace_period_end.map_or(false, |end| now <= end)
    }

    pub fn has_pending_downgrade(&self) -> bool {
        self.downgrade_to_plan.is_some()
    }
}
