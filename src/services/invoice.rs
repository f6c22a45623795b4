use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use log::info;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::models::invoice::{Invoice, InvoiceLineItem, InvoiceStatus};
use crate::models::subscription::Subscription;
use crate::services::store::BillingStore;

/// Builds one invoice per billing period for a subscription.
pub struct InvoiceGenerator {
    store: Arc<BillingStore>,
    tax_rate: Decimal,
    prefix: String,
    due_days: i64,
}

impl InvoiceGenerator {
    pub fn new(store: Arc<BillingStore>, config: &BillingConfig) -> Self {
        Self {
            store,
            tax_rate: config.tax_rate,
            prefix: config.invoice_prefix.clone(),
            due_days: config.invoice_due_days,
        }
    }

    /// Generate the invoice for one billing period.
    ///
    /// The subtotal and line item text are snapshots of the subscription's
    /// price and plan name at call time; invoices are historical records and
    /// stay unchanged through later plan renames or price changes.
    pub fn generate(
        &self,
        subscription: &Subscription,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Invoice {
        let now = Utc::now();
        let subtotal = subscription.price_amount;
        let tax_amount = compute_tax(subtotal, self.tax_rate);
        let invoice_number = self.store.next_invoice_number(&self.prefix, now.year());

        let invoice = Invoice {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            invoice_number,
            status: InvoiceStatus::Pending,
            subtotal,
            tax_rate: self.tax_rate,
            tax_amount,
            total_amount: subtotal + tax_amount,
            currency: subscription.currency.clone(),
            billing_period_start: period_start,
            billing_period_end: period_end,
            due_date: period_start + Duration::days(self.due_days),
            paid_at: None,
            line_items: vec![InvoiceLineItem {
                description: format!(
                    "{} plan, {} billing ({} to {})",
                    subscription.plan_name,
                    subscription.billing_cycle,
                    period_start.format("%Y-%m-%d"),
                    period_end.format("%Y-%m-%d"),
                ),
                amount: subtotal,
            }],
            created_at: now,
            updated_at: now,
        };

        let invoice = self.store.insert_invoice(invoice);
        info!(
            "Generated invoice {} for subscription {} ({} {})",
            invoice.invoice_number, subscription.id, invoice.total_amount, invoice.currency
        );
        invoice
    }

    pub fn mark_paid(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.store.update_invoice(invoice_id, |invoice| {
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn mark_failed(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.store.update_invoice(invoice_id, |invoice| {
            invoice.status = InvoiceStatus::Failed;
            Ok(())
        })
    }

    pub fn void(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.store.update_invoice(invoice_id, |invoice| {
            if invoice.status == InvoiceStatus::Paid {
                return Err(BillingError::CannotVoidPaidInvoice(invoice.id));
            }
            invoice.status = InvoiceStatus::Void;
            Ok(())
        })
    }

    pub fn find_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.store
            .find_invoice(invoice_id)
            .ok_or(BillingError::InvoiceNotFound(invoice_id))
    }
}

/// Round-half-up tax on a subtotal, at 2 decimal places.
fn compute_tax(subtotal: Decimal, tax_rate: Decimal) -> Decimal {
    (subtotal * tax_rate / Decimal::from(100))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
