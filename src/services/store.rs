use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::models::event::SubscriptionEvent;
use crate::models::invoice::{Invoice, InvoiceStatus};
use crate::models::payment::{PaymentAttempt, PaymentAttemptStatus};
use crate::models::subscription::{Subscription, SubscriptionStatus};

/// In-memory billing store.
///
/// Subscriptions are held behind per-row locks so that concurrent operations
/// on different subscriptions proceed in parallel, while operations on the
/// same subscription are serialized. The invoice sequence counter has its own
/// lock because it is the one piece of state shared across subscriptions.
pub struct BillingStore {
    subscriptions: Mutex<HashMap<Uuid, Arc<Mutex<Subscription>>>>,
    by_account: Mutex<HashMap<Uuid, Uuid>>,
    events: Mutex<Vec<SubscriptionEvent>>,
    invoices: Mutex<HashMap<Uuid, Invoice>>,
    attempts: Mutex<HashMap<Uuid, PaymentAttempt>>,
    /// Next-unused sequence per calendar year.
    invoice_sequences: Mutex<HashMap<i32, u32>>,
}

impl BillingStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            by_account: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            invoices: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            invoice_sequences: Mutex::new(HashMap::new()),
        }
    }

    // Subscription operations

    /// Insert a new subscription together with its creation events.
    ///
    /// The account index is checked and updated under its own lock, which is
    /// what enforces the one-subscription-per-account invariant under
    /// concurrent creates.
    pub fn insert_subscription(
        &self,
        subscription: Subscription,
        events: Vec<SubscriptionEvent>,
    ) -> Result<Subscription> {
        let mut by_account = self.by_account.lock().unwrap();
        if by_account.contains_key(&subscription.account_id) {
            return Err(BillingError::AlreadySubscribed(subscription.account_id));
        }
        by_account.insert(subscription.account_id, subscription.id);

        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id, Arc::new(Mutex::new(subscription.clone())));
        self.events.lock().unwrap().extend(events);
        Ok(subscription)
    }

    pub fn find_subscription(&self, id: Uuid) -> Option<Subscription> {
        let entry = self.subscriptions.lock().unwrap().get(&id).cloned();
        entry.map(|row| row.lock().unwrap().clone())
    }

    pub fn subscription_for_account(&self, account_id: Uuid) -> Option<Subscription> {
        let id = self.by_account.lock().unwrap().get(&account_id).copied()?;
        self.find_subscription(id)
    }

    /// Run a mutation against one subscription under its row lock.
    ///
    /// The closure works on a draft copy; the row is only replaced and the
    /// returned events appended when the closure succeeds, so a failed
    /// operation leaves nothing behind. Events commit while the row lock is
    /// still held, keeping the row update and its audit trail in one unit of
    /// work.
    pub fn update_subscription<F>(&self, id: Uuid, f: F) -> Result<Subscription>
    where
        F: FnOnce(&mut Subscription) -> Result<Vec<SubscriptionEvent>>,
    {
        let entry = self
            .subscriptions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(BillingError::SubscriptionNotFound(id))?;

        let mut row = entry.lock().unwrap();
        let mut draft = row.clone();
        let events = f(&mut draft)?;
        draft.updated_at = Utc::now();
        *row = draft.clone();
        self.events.lock().unwrap().extend(events);
        Ok(draft)
    }

    pub fn events_for(&self, subscription_id: Uuid) -> Vec<SubscriptionEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    // Sweep queries

    pub fn trials_ended_before(&self, cutoff: DateTime<Utc>) -> Vec<Subscription> {
        self.collect_subscriptions(|s| {
            s.status == SubscriptionStatus::Trial && s.trial_end.map_or(false, |end| end < cutoff)
        })
    }

    pub fn renewals_due_before(&self, cutoff: DateTime<Utc>) -> Vec<Subscription> {
        self.collect_subscriptions(|s| {
            s.current_period_end < cutoff
                && s.status != SubscriptionStatus::Trial
                && !s.status.is_terminal()
                && (s.status.can_renew() || s.cancel_at_period_end)
        })
    }

    pub fn grace_expired_before(&self, cutoff: DateTime<Utc>) -> Vec<Subscription> {
        self.collect_subscriptions(|s| {
            s.status == SubscriptionStatus::PastDue
                && s.grace_period_end.map_or(false, |end| end < cutoff)
        })
    }

    pub fn suspended_stale_before(&self, cutoff: DateTime<Utc>) -> Vec<Subscription> {
        self.collect_subscriptions(|s| {
            s.status == SubscriptionStatus::Suspended && s.updated_at < cutoff
        })
    }

    /// Subscriptions whose invoice is still Failed after the charge ran out
    /// of retries. The invoice and attempt tables are read one after the
    /// other, never nested.
    pub fn payment_exhausted_subscriptions(&self, max_attempts: u32) -> Vec<Uuid> {
        let failed_invoices: HashMap<Uuid, Uuid> = self
            .invoices
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.status == InvoiceStatus::Failed)
            .map(|i| (i.id, i.subscription_id))
            .collect();

        let mut ids: Vec<Uuid> = self
            .attempts
            .lock()
            .unwrap()
            .values()
            .filter(|a| {
                a.status == PaymentAttemptStatus::Failed && a.attempt_number >= max_attempts
            })
            .filter_map(|a| failed_invoices.get(&a.invoice_id).copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn collect_subscriptions<P>(&self, predicate: P) -> Vec<Subscription>
    where
        P: Fn(&Subscription) -> bool,
    {
        let entries: Vec<_> = self.subscriptions.lock().unwrap().values().cloned().collect();
        entries
            .iter()
            .filter_map(|entry| {
                let row = entry.lock().unwrap();
                if predicate(&row) {
                    Some(row.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    // Invoice operations

    pub fn insert_invoice(&self, invoice: Invoice) -> Invoice {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice.id, invoice.clone());
        invoice
    }

    pub fn find_invoice(&self, id: Uuid) -> Option<Invoice> {
        self.invoices.lock().unwrap().get(&id).cloned()
    }

    pub fn invoices_for(&self, subscription_id: Uuid) -> Vec<Invoice> {
        let mut invoices: Vec<_> = self
            .invoices
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_at);
        invoices
    }

    pub fn update_invoice<F>(&self, id: Uuid, f: F) -> Result<Invoice>
    where
        F: FnOnce(&mut Invoice) -> Result<()>,
    {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices
            .get_mut(&id)
            .ok_or(BillingError::InvoiceNotFound(id))?;
        f(invoice)?;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    /// Allocate the next invoice number for the given year.
    ///
    /// Read-max, increment and format all happen under the sequence lock;
    /// this is the serialization point for concurrent generation in the same
    /// year. When the counter has no entry for the year yet it is seeded from
    /// the invoices already on record.
    pub fn next_invoice_number(&self, prefix: &str, year: i32) -> String {
        let mut sequences = self.invoice_sequences.lock().unwrap();
        let next = sequences.entry(year).or_insert_with(|| {
            self.invoices
                .lock()
                .unwrap()
                .values()
                .filter_map(|i| parse_sequence(&i.invoice_number, year))
                .max()
                .map_or(1, |max| max + 1)
        });
        let number = format!("{}-{}-{:06}", prefix, year, next);
        *next += 1;
        number
    }

    // Payment attempt operations

    /// Create a charge attempt for an invoice. The attempt number continues
    /// from the highest one already recorded for the invoice, assigned under
    /// the attempts lock; retries bump that field in place, so counting rows
    /// would hand out duplicates.
    pub fn create_attempt(&self, invoice_id: Uuid, amount: rust_decimal::Decimal) -> PaymentAttempt {
        let mut attempts = self.attempts.lock().unwrap();
        let number = attempts
            .values()
            .filter(|a| a.invoice_id == invoice_id)
            .map(|a| a.attempt_number)
            .max()
            .map_or(1, |max| max + 1);
        let attempt = PaymentAttempt::new(invoice_id, amount, number);
        attempts.insert(attempt.id, attempt.clone());
        attempt
    }

    pub fn find_attempt(&self, id: Uuid) -> Option<PaymentAttempt> {
        self.attempts.lock().unwrap().get(&id).cloned()
    }

    pub fn update_attempt<F>(&self, id: Uuid, f: F) -> Result<PaymentAttempt>
    where
        F: FnOnce(&mut PaymentAttempt) -> Result<()>,
    {
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts
            .get_mut(&id)
            .ok_or(BillingError::PaymentAttemptNotFound(id))?;
        f(attempt)?;
        attempt.updated_at = Utc::now();
        Ok(attempt.clone())
    }
}

impl Default for BillingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract NNNNNN from PREFIX-YYYY-NNNNNN when the year segment matches
/// exactly.
fn parse_sequence(invoice_number: &str, year: i32) -> Option<u32> {
    let mut parts = invoice_number.rsplitn(3, '-');
    let sequence = parts.next()?.parse().ok()?;
    let year_segment = parts.next()?;
    if year_segment.parse::<i32>().ok()? == year {
        Some(sequence)
    } else {
        None
    }
}
