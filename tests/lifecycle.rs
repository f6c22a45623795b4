//! End-to-end lifecycle scenarios through the public crate API.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use billing_engine::config::BillingConfig;
use billing_engine::models::event::SubscriptionEventType;
use billing_engine::models::invoice::InvoiceStatus;
use billing_engine::models::plan::BillingCycle;
use billing_engine::models::subscription::SubscriptionStatus;
use billing_engine::services::collaborators::{DefaultReferralPolicy, InMemoryAccountDirectory};
use billing_engine::tasks::sweep::run_billing_sweep;
use billing_engine::{
    BillingError, BillingStore, PaymentRetryScheduler, PlanCatalog, SubscriptionLifecycle,
};

struct Engine {
    lifecycle: SubscriptionLifecycle,
    retries: PaymentRetryScheduler,
    directory: Arc<InMemoryAccountDirectory>,
}

fn engine() -> Engine {
    let store = Arc::new(BillingStore::new());
    let directory = Arc::new(InMemoryAccountDirectory::new());
    let lifecycle = SubscriptionLifecycle::new(
        store.clone(),
        Arc::new(PlanCatalog::seed_default()),
        directory.clone(),
        Arc::new(DefaultReferralPolicy::new(14)),
        BillingConfig::default(),
    );
    Engine {
        lifecycle,
        retries: PaymentRetryScheduler::new(store),
        directory,
    }
}

#[tokio::test]
async fn full_journey_trial_to_paid_renewal() {
    let engine = engine();
    let account = engine.directory.register("merchant@example.com", "Merchant");

    // Sign up: trial with access, no invoice yet
    let sub = engine
        .lifecycle
        .create_subscription(account.id, "growth", BillingCycle::Monthly)
        .await
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Trial);
    assert!(engine.lifecycle.has_access(sub.id).unwrap());
    assert!(engine.lifecycle.is_in_trial(sub.id).unwrap());
    assert!(engine.lifecycle.store().invoices_for(sub.id).is_empty());

    // First charge succeeds, subscription converts
    let active = engine.lifecycle.activate_subscription(sub.id).await.unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(!engine.lifecycle.is_in_trial(sub.id).unwrap());

    // A month later the sweep renews and bills the new period
    engine
        .lifecycle
        .store()
        .update_subscription(sub.id, |s| {
            s.current_period_end = Utc::now() - Duration::hours(1);
            Ok(vec![])
        })
        .unwrap();
    let outcome = run_billing_sweep(&engine.lifecycle);
    assert_eq!(outcome.renewed, 1);

    let invoices = engine.lifecycle.store().invoices_for(sub.id);
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(invoice.subtotal, dec!(299.00));
    assert_eq!(invoice.tax_amount, dec!(59.80));
    assert_eq!(invoice.total_amount, dec!(358.80));
    assert_eq!(
        invoice.due_date,
        invoice.billing_period_start + Duration::days(7)
    );

    // The charge clears
    let attempt = engine
        .retries
        .record_attempt(invoice.id, invoice.total_amount)
        .unwrap();
    engine.retries.mark_succeeded(attempt.id).unwrap();
    let paid = engine.lifecycle.invoices().mark_paid(invoice.id).unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert!(paid.paid_at.is_some());
}

#[tokio::test]
async fn full_journey_dunning_to_expiry() {
    let engine = engine();
    let account = engine.directory.register("churner@example.com", "Churner");
    let sub = engine
        .lifecycle
        .create_subscription(account.id, "starter", BillingCycle::Monthly)
        .await
        .unwrap();
    engine.lifecycle.activate_subscription(sub.id).await.unwrap();

    // Renewal happens, then the charge fails three times
    let renewed = engine.lifecycle.renew_subscription(sub.id).unwrap();
    let invoice = engine.lifecycle.store().invoices_for(renewed.id)[0].clone();

    let attempt = engine
        .retries
        .record_attempt(invoice.id, invoice.total_amount)
        .unwrap();
    for _ in 0..3 {
        engine
            .retries
            .mark_failed(attempt.id, "card_declined", "Do not honor")
            .unwrap();
        engine.retries.schedule_retry(attempt.id).unwrap();
    }
    let exhausted = engine.lifecycle.store().find_attempt(attempt.id).unwrap();
    assert!(engine.retries.is_exhausted(&exhausted));
    engine.lifecycle.invoices().mark_failed(invoice.id).unwrap();

    // Dunning: past due with grace, then suspended, then expired
    let past_due = engine.lifecycle.mark_past_due(sub.id).unwrap();
    assert!(engine.lifecycle.has_access(sub.id).unwrap());
    assert!(past_due.grace_period_end.unwrap() > Utc::now());

    engine
        .lifecycle
        .store()
        .update_subscription(sub.id, |s| {
            s.grace_period_end = Some(Utc::now() - Duration::hours(1));
            Ok(vec![])
        })
        .unwrap();
    let outcome = run_billing_sweep(&engine.lifecycle);
    assert_eq!(outcome.suspended, 1);
    assert!(!engine.lifecycle.has_access(sub.id).unwrap());

    let expired = engine.lifecycle.expire_subscription(sub.id).unwrap();
    assert_eq!(expired.status, SubscriptionStatus::Expired);

    // The audit trail tells the whole story in order
    let types: Vec<_> = engine
        .lifecycle
        .events_for(sub.id)
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            SubscriptionEventType::Created,
            SubscriptionEventType::TrialStarted,
            SubscriptionEventType::Activated,
            SubscriptionEventType::Renewed,
            SubscriptionEventType::PastDue,
            SubscriptionEventType::Suspended,
            SubscriptionEventType::Expired,
        ]
    );
}

#[tokio::test]
async fn one_subscription_per_account() {
    let engine = engine();
    let account = engine.directory.register("solo@example.com", "Solo");
    engine
        .lifecycle
        .create_subscription(account.id, "starter", BillingCycle::Monthly)
        .await
        .unwrap();

    let err = engine
        .lifecycle
        .create_subscription(account.id, "scale", BillingCycle::Quarterly)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadySubscribed(id) if id == account.id));
}

#[tokio::test]
async fn invoice_numbers_are_sequential_within_a_year() {
    let engine = engine();
    let mut numbers = Vec::new();
    for i in 0..3 {
        let account = engine
            .directory
            .register(&format!("shop{}@example.com", i), "Shop");
        let sub = engine
            .lifecycle
            .create_subscription(account.id, "starter", BillingCycle::Monthly)
            .await
            .unwrap();
        engine.lifecycle.activate_subscription(sub.id).await.unwrap();
        engine.lifecycle.renew_subscription(sub.id).unwrap();
        numbers.push(
            engine.lifecycle.store().invoices_for(sub.id)[0]
                .invoice_number
                .clone(),
        );
    }

    let year = Utc::now().format("%Y").to_string();
    for (i, number) in numbers.iter().enumerate() {
        assert_eq!(*number, format!("INV-{}-{:06}", year, i + 1));
    }
}

#[tokio::test]
async fn scheduled_cancellation_processed_at_period_end() {
    let engine = engine();
    let account = engine.directory.register("leaver@example.com", "Leaver");
    let sub = engine
        .lifecycle
        .create_subscription(account.id, "growth", BillingCycle::Monthly)
        .await
        .unwrap();
    engine.lifecycle.activate_subscription(sub.id).await.unwrap();

    let cancelled = engine
        .lifecycle
        .cancel_subscription(sub.id, "switching provider")
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Active);
    assert!(cancelled.cancel_at_period_end);
    assert!(!cancelled.auto_renew);
    assert!(engine.lifecycle.has_access(sub.id).unwrap());

    engine
        .lifecycle
        .store()
        .update_subscription(sub.id, |s| {
            s.current_period_end = Utc::now() - Duration::hours(1);
            Ok(vec![])
        })
        .unwrap();
    let outcome = run_billing_sweep(&engine.lifecycle);
    assert_eq!(outcome.cancelled, 1);

    let after = engine.lifecycle.find_by_id(sub.id).unwrap();
    assert_eq!(after.status, SubscriptionStatus::Cancelled);
    assert!(!engine.lifecycle.has_access(sub.id).unwrap());
    // No invoice was generated for the period that never started
    assert!(engine.lifecycle.store().invoices_for(sub.id).is_empty());
}

#[tokio::test]
async fn downgrade_takes_effect_at_renewal_and_changes_billing() {
    let engine = engine();
    let account = engine.directory.register("saver@example.com", "Saver");
    let sub = engine
        .lifecycle
        .create_subscription(account.id, "scale", BillingCycle::Monthly)
        .await
        .unwrap();
    engine.lifecycle.activate_subscription(sub.id).await.unwrap();

    engine
        .lifecycle
        .schedule_plan_downgrade(sub.id, "starter", BillingCycle::Quarterly)
        .unwrap();
    // Live plan unchanged until the renewal
    let pending = engine.lifecycle.find_by_id(sub.id).unwrap();
    assert_eq!(pending.plan_code, "scale");
    assert_eq!(pending.downgrade_to_plan.as_deref(), Some("starter"));

    let renewed = engine.lifecycle.renew_subscription(sub.id).unwrap();
    assert_eq!(renewed.plan_code, "starter");
    assert_eq!(renewed.billing_cycle, BillingCycle::Quarterly);
    assert!(renewed.downgrade_to_plan.is_none());

    // Quarterly starter is billed at the catalog price plus tax
    let invoice = engine.lifecycle.store().invoices_for(sub.id)[0].clone();
    assert_eq!(invoice.subtotal, dec!(267.00));
    assert_eq!(invoice.total_amount, dec!(267.00) + dec!(53.40));
}

#[tokio::test]
async fn upgrade_is_immediate_and_supersedes_downgrade() {
    let engine = engine();
    let account = engine.directory.register("grower@example.com", "Grower");
    let sub = engine
        .lifecycle
        .create_subscription(account.id, "starter", BillingCycle::Monthly)
        .await
        .unwrap();
    engine.lifecycle.activate_subscription(sub.id).await.unwrap();

    let err = engine
        .lifecycle
        .upgrade_plan(sub.id, "starter", BillingCycle::Monthly)
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidTierChange { from: 1, to: 1 }));

    let upgraded = engine
        .lifecycle
        .upgrade_plan(sub.id, "growth", BillingCycle::Monthly)
        .unwrap();
    assert_eq!(upgraded.plan_code, "growth");
    assert_eq!(upgraded.price_amount, dec!(299.00));
    // Immediate upgrade does not bill mid-period
    assert!(engine.lifecycle.store().invoices_for(sub.id).is_empty());

    // A later upgrade wipes a downgrade that was waiting for renewal
    engine
        .lifecycle
        .schedule_plan_downgrade(sub.id, "starter", BillingCycle::Monthly)
        .unwrap();
    let upgraded = engine
        .lifecycle
        .upgrade_plan(sub.id, "scale", BillingCycle::Monthly)
        .unwrap();
    assert!(upgraded.downgrade_to_plan.is_none());
    assert!(upgraded.downgrade_to_price.is_none());
}

#[tokio::test]
async fn past_due_renewal_clears_grace_and_restores_active() {
    let engine = engine();
    let account = engine.directory.register("late@example.com", "Late");
    let sub = engine
        .lifecycle
        .create_subscription(account.id, "growth", BillingCycle::Monthly)
        .await
        .unwrap();
    engine.lifecycle.activate_subscription(sub.id).await.unwrap();
    engine.lifecycle.mark_past_due(sub.id).unwrap();
    assert!(engine.lifecycle.is_in_grace_period(sub.id).unwrap());

    // Payment recovered: renewal brings the subscription back
    let renewed = engine.lifecycle.renew_subscription(sub.id).unwrap();
    assert_eq!(renewed.status, SubscriptionStatus::Active);
    assert!(renewed.grace_period_end.is_none());
    assert!(!engine.lifecycle.is_in_grace_period(sub.id).unwrap());
}
