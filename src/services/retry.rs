use std::sync::Arc;

use chrono::{Duration, Utc};
use log::info;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::models::payment::{PaymentAttempt, PaymentAttemptStatus};
use crate::services::store::BillingStore;

/// Maximum charge attempts per invoice.
pub const MAX_PAYMENT_ATTEMPTS: u32 = 3;

/// Tracks payment attempts against an invoice and decides whether and when
/// to retry a failed charge.
///
/// The scheduler never touches subscription state; exhaustion is the signal
/// the lifecycle sweep uses to drive PastDue and Suspended transitions.
pub struct PaymentRetryScheduler {
    store: Arc<BillingStore>,
}

impl PaymentRetryScheduler {
    pub fn new(store: Arc<BillingStore>) -> Self {
        Self { store }
    }

    /// Record a new charge attempt against an invoice.
    pub fn record_attempt(&self, invoice_id: Uuid, amount: Decimal) -> Result<PaymentAttempt> {
        self.store
            .find_invoice(invoice_id)
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        Ok(self.store.create_attempt(invoice_id, amount))
    }

    pub fn mark_succeeded(&self, attempt_id: Uuid) -> Result<PaymentAttempt> {
        self.store.update_attempt(attempt_id, |attempt| {
            attempt.status = PaymentAttemptStatus::Succeeded;
            attempt.next_retry_at = None;
            Ok(())
        })
    }

    pub fn mark_failed(
        &self,
        attempt_id: Uuid,
        failure_code: &str,
        failure_message: &str,
    ) -> Result<PaymentAttempt> {
        self.store.update_attempt(attempt_id, |attempt| {
            attempt.status = PaymentAttemptStatus::Failed;
            attempt.failure_code = Some(failure_code.to_string());
            attempt.failure_message = Some(failure_message.to_string());
            Ok(())
        })
    }

    /// Whether another retry is allowed for this attempt.
    pub fn can_retry(&self, attempt: &PaymentAttempt) -> bool {
        attempt.status == PaymentAttemptStatus::Failed
            && attempt.attempt_number < MAX_PAYMENT_ATTEMPTS
    }

    /// Schedule the next retry: the Nth failure waits N days. A no-op when
    /// the attempt is not retryable. The retryability check and the
    /// increment run under the same lock, so concurrent calls cannot push
    /// the attempt number past the maximum.
    pub fn schedule_retry(&self, attempt_id: Uuid) -> Result<PaymentAttempt> {
        let mut scheduled = false;
        let updated = self.store.update_attempt(attempt_id, |attempt| {
            if self.can_retry(attempt) {
                attempt.next_retry_at =
                    Some(Utc::now() + Duration::days(i64::from(attempt.attempt_number)));
                attempt.attempt_number += 1;
                scheduled = true;
            }
            Ok(())
        })?;
        if scheduled {
            info!(
                "Scheduled retry {} for invoice {} at {:?}",
                updated.attempt_number, updated.invoice_id, updated.next_retry_at
            );
        }
        Ok(updated)
    }

    pub fn remaining_retries(&self, attempt: &PaymentAttempt) -> u32 {
        MAX_PAYMENT_ATTEMPTS.saturating_sub(attempt.attempt_number)
    }

    /// All attempts used up and the charge still failing.
    pub fn is_exhausted(&self, attempt: &PaymentAttempt) -> bool {
        attempt.status == PaymentAttemptStatus::Failed
            && attempt.attempt_number >= MAX_PAYMENT_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BillingConfig;
    use crate::models::plan::{BillingCycle, Plan, Price};
    use crate::models::subscription::Subscription;
    use crate::services::invoice::InvoiceGenerator;
    use rust_decimal_macros::dec;

    fn setup() -> (PaymentRetryScheduler, Uuid) {
        let store = Arc::new(BillingStore::new());
        let generator = InvoiceGenerator::new(store.clone(), &BillingConfig::default());

        let plan = Plan {
            code: "growth".to_string(),
            name: "Growth".to_string(),
            tier_order: 2,
            max_stores: Some(5),
            active: true,
        };
        let price = Price {
            plan_code: "growth".to_string(),
            cycle: BillingCycle::Monthly,
            amount: dec!(299.00),
            currency: "USD".to_string(),
            active: true,
        };
        let sub = Subscription::new(Uuid::new_v4(), &plan, &price, BillingCycle::Monthly, 14);
        let now = Utc::now();
        let invoice = generator.generate(&sub, now, now + Duration::days(30));

        (PaymentRetryScheduler::new(store), invoice.id)
    }

    #[test]
    fn test_attempt_numbers_are_one_based_and_sequential() {
        let (scheduler, invoice_id) = setup();
        let first = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        let second = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        assert_eq!(first.attempt_number, 1);
        assert_eq!(second.attempt_number, 2);
    }

    #[test]
    fn test_attempt_against_missing_invoice_fails() {
        let (scheduler, _) = setup();
        let err = scheduler
            .record_attempt(Uuid::new_v4(), dec!(1.00))
            .unwrap_err();
        assert!(matches!(err, BillingError::InvoiceNotFound(_)));
    }

    #[test]
    fn test_retry_offsets_follow_attempt_number() {
        let (scheduler, invoice_id) = setup();
        let attempt = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        scheduler
            .mark_failed(attempt.id, "card_declined", "Card declined")
            .unwrap();

        // First failure: retry one day out
        let before = Utc::now();
        let scheduled = scheduler.schedule_retry(attempt.id).unwrap();
        assert_eq!(scheduled.attempt_number, 2);
        let retry_at = scheduled.next_retry_at.unwrap();
        assert!(retry_at >= before + Duration::days(1));
        assert!(retry_at <= Utc::now() + Duration::days(1));

        // Second failure: retry two days out
        scheduler
            .mark_failed(attempt.id, "card_declined", "Card declined")
            .unwrap();
        let before = Utc::now();
        let scheduled = scheduler.schedule_retry(attempt.id).unwrap();
        assert_eq!(scheduled.attempt_number, 3);
        let retry_at = scheduled.next_retry_at.unwrap();
        assert!(retry_at >= before + Duration::days(2));
    }

    #[test]
    fn test_exhaustion_after_three_attempts() {
        let (scheduler, invoice_id) = setup();
        let attempt = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();

        scheduler.mark_failed(attempt.id, "insufficient_funds", "No funds").unwrap();
        scheduler.schedule_retry(attempt.id).unwrap();
        scheduler.mark_failed(attempt.id, "insufficient_funds", "No funds").unwrap();
        scheduler.schedule_retry(attempt.id).unwrap();
        let exhausted = scheduler
            .mark_failed(attempt.id, "insufficient_funds", "No funds")
            .unwrap();

        assert_eq!(exhausted.attempt_number, 3);
        assert!(!scheduler.can_retry(&exhausted));
        assert_eq!(scheduler.remaining_retries(&exhausted), 0);
        assert!(scheduler.is_exhausted(&exhausted));

        // Scheduling once exhausted is a no-op
        let unchanged = scheduler.schedule_retry(attempt.id).unwrap();
        assert_eq!(unchanged.attempt_number, 3);
    }

    #[test]
    fn test_concurrent_scheduling_never_exceeds_max_attempts() {
        let (scheduler, invoice_id) = setup();
        let scheduler = Arc::new(scheduler);
        let attempt = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        scheduler
            .mark_failed(attempt.id, "card_declined", "Card declined")
            .unwrap();
        scheduler.schedule_retry(attempt.id).unwrap();
        scheduler
            .mark_failed(attempt.id, "card_declined", "Card declined")
            .unwrap();

        // One retry left; racing deliveries must not both take it
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                let attempt_id = attempt.id;
                std::thread::spawn(move || scheduler.schedule_retry(attempt_id).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let settled = scheduler.store.find_attempt(attempt.id).unwrap();
        assert_eq!(settled.attempt_number, MAX_PAYMENT_ATTEMPTS);
    }

    #[test]
    fn test_new_attempt_never_reuses_a_retried_number() {
        let (scheduler, invoice_id) = setup();
        let attempt = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        scheduler
            .mark_failed(attempt.id, "card_declined", "Card declined")
            .unwrap();
        let retried = scheduler.schedule_retry(attempt.id).unwrap();
        assert_eq!(retried.attempt_number, 2);

        // The retry executed as a fresh row continues past the bumped number
        let next = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        assert_eq!(next.attempt_number, 3);
    }

    #[test]
    fn test_pending_and_succeeded_attempts_are_not_retryable() {
        let (scheduler, invoice_id) = setup();
        let attempt = scheduler.record_attempt(invoice_id, dec!(358.80)).unwrap();
        assert!(!scheduler.can_retry(&attempt));

        let succeeded = scheduler.mark_succeeded(attempt.id).unwrap();
        assert!(!scheduler.can_retry(&succeeded));
        assert!(!scheduler.is_exhausted(&succeeded));
    }
}
