use std::sync::Arc;

use chrono::{Duration, Months, Utc};
use log::{info, warn};
use serde_json::json;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::models::event::{SubscriptionEvent, SubscriptionEventType};
use crate::models::plan::BillingCycle;
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::services::catalog::PlanCatalog;
use crate::services::collaborators::{AccountDirectory, ReferralPolicy};
use crate::services::invoice::InvoiceGenerator;
use crate::services::store::BillingStore;

/// The subscription state machine.
///
/// Every mutating operation runs under the subscription's row lock and
/// commits the row together with its audit events; collaborator notification
/// happens only after the commit.
pub struct SubscriptionLifecycle {
    store: Arc<BillingStore>,
    catalog: Arc<PlanCatalog>,
    invoices: InvoiceGenerator,
    accounts: Arc<dyn AccountDirectory>,
    referrals: Arc<dyn ReferralPolicy>,
    config: BillingConfig,
}

impl SubscriptionLifecycle {
    pub fn new(
        store: Arc<BillingStore>,
        catalog: Arc<PlanCatalog>,
        accounts: Arc<dyn AccountDirectory>,
        referrals: Arc<dyn ReferralPolicy>,
        config: BillingConfig,
    ) -> Self {
        let invoices = InvoiceGenerator::new(store.clone(), &config);
        Self {
            store,
            catalog,
            invoices,
            accounts,
            referrals,
            config,
        }
    }

    pub fn store(&self) -> &Arc<BillingStore> {
        &self.store
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn invoices(&self) -> &InvoiceGenerator {
        &self.invoices
    }

    /// Start a trial subscription for an account.
    pub async fn create_subscription(
        &self,
        account_id: Uuid,
        plan_code: &str,
        cycle: BillingCycle,
    ) -> Result<Subscription> {
        self.accounts.find_account(account_id).await?;
        let plan = self.catalog.find_plan(plan_code)?;
        let price = self.catalog.find_price(plan_code, cycle)?;
        let trial_days = self.referrals.trial_days_for(account_id).await;

        let subscription = Subscription::new(account_id, plan, price, cycle, trial_days);

        let mut created = SubscriptionEvent::new(subscription.id, SubscriptionEventType::Created);
        created.new_status = Some(SubscriptionStatus::Trial);
        created.new_plan = Some(plan.code.clone());
        created.metadata = json!({
            "cycle": cycle.to_string(),
            "price": price.amount,
            "currency": price.currency,
        });

        let mut trial_started =
            SubscriptionEvent::new(subscription.id, SubscriptionEventType::TrialStarted);
        trial_started.metadata = json!({
            "trial_days": trial_days,
            "trial_end": subscription.trial_end,
        });

        let subscription = self
            .store
            .insert_subscription(subscription, vec![created, trial_started])?;
        info!(
            "Created subscription {} for account {} on plan {} ({} day trial)",
            subscription.id, account_id, plan_code, trial_days
        );
        Ok(subscription)
    }

    /// Activate after a successful first charge. Idempotent: already-active
    /// subscriptions are a safe no-op, so sweeps and webhooks can re-run it.
    pub async fn activate_subscription(&self, id: Uuid) -> Result<Subscription> {
        let mut transitioned = false;
        let subscription = self.store.update_subscription(id, |sub| {
            if sub.status == SubscriptionStatus::Active {
                return Ok(vec![]);
            }
            if !matches!(
                sub.status,
                SubscriptionStatus::Trial | SubscriptionStatus::PendingPayment
            ) {
                return Err(BillingError::InvalidStateTransition {
                    operation: "activate",
                    status: sub.status,
                });
            }

            let previous = sub.status;
            let now = Utc::now();
            sub.status = SubscriptionStatus::Active;
            sub.current_period_start = now;
            sub.current_period_end = now + Months::new(sub.billing_cycle.months());
            sub.grace_period_end = None;
            transitioned = true;
            Ok(vec![SubscriptionEvent::status_change(
                sub.id,
                SubscriptionEventType::Activated,
                previous,
                sub.status,
            )])
        })?;

        if transitioned {
            info!("Activated subscription {}", id);
            // Best-effort; a referral hiccup must not fail the activation.
            if let Err(e) = self
                .referrals
                .on_subscription_activated(subscription.account_id)
                .await
            {
                warn!(
                    "Referral notification failed for account {}: {}",
                    subscription.account_id, e
                );
            }
        }
        Ok(subscription)
    }

    /// Switch to a higher tier, effective immediately. No prorated invoice is
    /// generated and the current period end is untouched.
    pub fn upgrade_plan(
        &self,
        id: Uuid,
        new_plan_code: &str,
        cycle: BillingCycle,
    ) -> Result<Subscription> {
        let new_plan = self.catalog.find_plan(new_plan_code)?;
        let new_price = self.catalog.find_price(new_plan_code, cycle)?;

        self.store.update_subscription(id, |sub| {
            if sub.status.is_terminal() {
                return Err(BillingError::InvalidStateTransition {
                    operation: "upgrade",
                    status: sub.status,
                });
            }
            let current_plan = self.catalog.find_plan(&sub.plan_code)?;
            if new_plan.tier_order <= current_plan.tier_order {
                return Err(BillingError::InvalidTierChange {
                    from: current_plan.tier_order,
                    to: new_plan.tier_order,
                });
            }

            let previous_plan = sub.plan_code.clone();
            sub.plan_code = new_plan.code.clone();
            sub.plan_name = new_plan.name.clone();
            sub.price_amount = new_price.amount;
            sub.currency = new_price.currency.clone();
            sub.billing_cycle = cycle;
            // An upgrade supersedes any pending downgrade
            sub.downgrade_to_plan = None;
            sub.downgrade_to_cycle = None;
            sub.downgrade_to_price = None;

            let mut event = SubscriptionEvent::new(sub.id, SubscriptionEventType::Upgraded);
            event.previous_plan = Some(previous_plan);
            event.new_plan = Some(sub.plan_code.clone());
            event.metadata = json!({ "cycle": cycle.to_string() });
            Ok(vec![event])
        })
    }

    /// Schedule a downgrade for the next renewal; the live plan is untouched.
    pub fn schedule_plan_downgrade(
        &self,
        id: Uuid,
        new_plan_code: &str,
        cycle: BillingCycle,
    ) -> Result<Subscription> {
        let new_plan = self.catalog.find_plan(new_plan_code)?;
        let new_price = self.catalog.find_price(new_plan_code, cycle)?;

        self.store.update_subscription(id, |sub| {
            if sub.status.is_terminal() {
                return Err(BillingError::InvalidStateTransition {
                    operation: "downgrade",
                    status: sub.status,
                });
            }
            let current_plan = self.catalog.find_plan(&sub.plan_code)?;
            if new_plan.tier_order >= current_plan.tier_order {
                return Err(BillingError::InvalidTierChange {
                    from: current_plan.tier_order,
                    to: new_plan.tier_order,
                });
            }

            sub.downgrade_to_plan = Some(new_plan.code.clone());
            sub.downgrade_to_cycle = Some(cycle);
            sub.downgrade_to_price = Some(new_price.amount);

            let mut event =
                SubscriptionEvent::new(sub.id, SubscriptionEventType::DowngradeScheduled);
            event.previous_plan = Some(sub.plan_code.clone());
            event.new_plan = Some(new_plan.code.clone());
            event.metadata = json!({ "effective": "next_renewal" });
            Ok(vec![event])
        })
    }

    /// Schedule cancellation at period end. Access is retained until the
    /// renewal sweep processes it.
    pub fn cancel_subscription(&self, id: Uuid, reason: &str) -> Result<Subscription> {
        self.store.update_subscription(id, |sub| {
            if !sub.status.can_cancel() {
                return Err(BillingError::InvalidStateTransition {
                    operation: "cancel",
                    status: sub.status,
                });
            }

            sub.cancel_at_period_end = true;
            sub.cancelled_at = Some(Utc::now());
            sub.cancellation_reason = Some(reason.to_string());
            sub.auto_renew = false;

            let mut event = SubscriptionEvent::new(sub.id, SubscriptionEventType::CancelScheduled);
            event.metadata = json!({ "reason": reason });
            Ok(vec![event])
        })
    }

    /// Undo a scheduled cancellation before it takes effect.
    pub fn reactivate_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.store.update_subscription(id, |sub| {
            if sub.status.is_terminal() || !sub.cancel_at_period_end {
                return Err(BillingError::InvalidStateTransition {
                    operation: "reactivate",
                    status: sub.status,
                });
            }

            sub.cancel_at_period_end = false;
            sub.cancelled_at = None;
            sub.cancellation_reason = None;
            sub.auto_renew = true;

            Ok(vec![SubscriptionEvent::new(
                sub.id,
                SubscriptionEventType::Reactivated,
            )])
        })
    }

    /// Roll the subscription into its next billing period.
    ///
    /// A scheduled cancellation is processed here (no new invoice); otherwise
    /// any pending downgrade is applied before the new period is computed,
    /// and the invoice for the new period is generated in the same unit of
    /// work.
    pub fn renew_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.store.update_subscription(id, |sub| {
            if sub.status.is_terminal() {
                return Err(BillingError::InvalidStateTransition {
                    operation: "renew",
                    status: sub.status,
                });
            }

            if sub.cancel_at_period_end {
                let previous = sub.status;
                sub.status = SubscriptionStatus::Cancelled;
                let mut event = SubscriptionEvent::status_change(
                    sub.id,
                    SubscriptionEventType::Cancelled,
                    previous,
                    sub.status,
                );
                event.metadata = json!({ "reason": sub.cancellation_reason });
                return Ok(vec![event]);
            }

            if !sub.status.can_renew() {
                return Err(BillingError::InvalidStateTransition {
                    operation: "renew",
                    status: sub.status,
                });
            }

            let previous_status = sub.status;
            let mut events = Vec::new();

            // Apply a pending downgrade before computing the new period
            let mut plan_change = None;
            if let (Some(code), Some(cycle)) =
                (sub.downgrade_to_plan.clone(), sub.downgrade_to_cycle)
            {
                let plan = self.catalog.find_plan(&code)?;
                let price = self.catalog.find_price(&code, cycle)?;
                plan_change = Some((sub.plan_code.clone(), plan.code.clone()));
                sub.plan_code = plan.code.clone();
                sub.plan_name = plan.name.clone();
                sub.price_amount = price.amount;
                sub.currency = price.currency.clone();
                sub.billing_cycle = cycle;
                sub.downgrade_to_plan = None;
                sub.downgrade_to_cycle = None;
                sub.downgrade_to_price = None;
            }

            sub.current_period_start = sub.current_period_end;
            sub.current_period_end =
                sub.current_period_start + Months::new(sub.billing_cycle.months());
            sub.status = SubscriptionStatus::Active;
            sub.grace_period_end = None;

            let invoice =
                self.invoices
                    .generate(sub, sub.current_period_start, sub.current_period_end);

            let mut event = SubscriptionEvent::status_change(
                sub.id,
                SubscriptionEventType::Renewed,
                previous_status,
                sub.status,
            );
            if let Some((previous_plan, new_plan)) = plan_change {
                event.previous_plan = Some(previous_plan);
                event.new_plan = Some(new_plan);
            }
            event.metadata = json!({
                "period_start": sub.current_period_start,
                "period_end": sub.current_period_end,
                "invoice_number": invoice.invoice_number,
            });
            events.push(event);
            Ok(events)
        })
    }

    /// End the trial; the first real charge is attempted by the payment
    /// collaborator next.
    pub fn end_trial(&self, id: Uuid) -> Result<Subscription> {
        self.store.update_subscription(id, |sub| {
            if sub.status != SubscriptionStatus::Trial {
                return Err(BillingError::InvalidStateTransition {
                    operation: "end trial for",
                    status: sub.status,
                });
            }

            let previous = sub.status;
            sub.status = SubscriptionStatus::PendingPayment;
            Ok(vec![SubscriptionEvent::status_change(
                sub.id,
                SubscriptionEventType::TrialEnded,
                previous,
                sub.status,
            )])
        })
    }

    /// Flag a failed renewal charge; access is retained through the grace
    /// window.
    pub fn mark_past_due(&self, id: Uuid) -> Result<Subscription> {
        let grace_days = self.config.grace_period_days;
        self.store.update_subscription(id, |sub| {
            if sub.status != SubscriptionStatus::Active {
                return Err(BillingError::InvalidStateTransition {
                    operation: "mark past due",
                    status: sub.status,
                });
            }

            let previous = sub.status;
            sub.status = SubscriptionStatus::PastDue;
            sub.grace_period_end = Some(Utc::now() + Duration::days(grace_days));

            let mut event = SubscriptionEvent::status_change(
                sub.id,
                SubscriptionEventType::PastDue,
                previous,
                sub.status,
            );
            event.metadata = json!({ "grace_period_end": sub.grace_period_end });
            Ok(vec![event])
        })
    }

    /// Revoke access after the grace period lapses or retries are exhausted.
    pub fn suspend_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.store.update_subscription(id, |sub| {
            if sub.status != SubscriptionStatus::PastDue {
                return Err(BillingError::InvalidStateTransition {
                    operation: "suspend",
                    status: sub.status,
                });
            }

            let previous = sub.status;
            sub.status = SubscriptionStatus::Suspended;
            Ok(vec![SubscriptionEvent::status_change(
                sub.id,
                SubscriptionEventType::Suspended,
                previous,
                sub.status,
            )])
        })
    }

    /// Terminal expiry of a long-suspended subscription.
    pub fn expire_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.store.update_subscription(id, |sub| {
            if sub.status != SubscriptionStatus::Suspended {
                return Err(BillingError::InvalidStateTransition {
                    operation: "expire",
                    status: sub.status,
                });
            }

            let previous = sub.status;
            sub.status = SubscriptionStatus::Expired;
            Ok(vec![SubscriptionEvent::status_change(
                sub.id,
                SubscriptionEventType::Expired,
                previous,
                sub.status,
            )])
        })
    }

    // Read accessors

    pub fn find_by_id(&self, id: Uuid) -> Result<Subscription> {
        self.store
            .find_subscription(id)
            .ok_or(BillingError::SubscriptionNotFound(id))
    }

    pub fn has_access(&self, id: Uuid) -> Result<bool> {
        Ok(self.find_by_id(id)?.status.has_access())
    }

    pub fn is_in_trial(&self, id: Uuid) -> Result<bool> {
        Ok(self.find_by_id(id)?.is_in_trial())
    }

    pub fn is_in_grace_period(&self, id: Uuid) -> Result<bool> {
        Ok(self.find_by_id(id)?.is_in_grace_period(Utc::now()))
    }

    pub fn events_for(&self, id: Uuid) -> Vec<SubscriptionEvent> {
        self.store.events_for(id)
    }
}
