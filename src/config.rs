use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{BillingError, Result};

/// Engine configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Default trial length in days; the referral policy may extend it.
    pub trial_days: i64,
    /// Days of retained access after a subscription goes past due.
    pub grace_period_days: i64,
    /// Days a suspended subscription may sit untouched before it expires.
    pub suspension_cutoff_days: i64,
    /// Flat tax rate applied to every invoice, in percent.
    pub tax_rate: Decimal,
    /// Prefix for generated invoice numbers.
    pub invoice_prefix: String,
    /// Days between period start and invoice due date.
    pub invoice_due_days: i64,
    /// Seconds between sweep runs.
    pub sweep_interval_secs: u64,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(BillingConfig {
            trial_days: parse_var("BILLING_TRIAL_DAYS", 14)?,
            grace_period_days: parse_var("BILLING_GRACE_PERIOD_DAYS", 3)?,
            suspension_cutoff_days: parse_var("BILLING_SUSPENSION_CUTOFF_DAYS", 30)?,
            tax_rate: parse_var("BILLING_TAX_RATE", Decimal::from(20))?,
            invoice_prefix: env::var("BILLING_INVOICE_PREFIX").unwrap_or_else(|_| "INV".to_string()),
            invoice_due_days: parse_var("BILLING_INVOICE_DUE_DAYS", 7)?,
            sweep_interval_secs: parse_var("BILLING_SWEEP_INTERVAL_SECS", 3600)?,
        })
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        BillingConfig {
            trial_days: 14,
            grace_period_days: 3,
            suspension_cutoff_days: 30,
            tax_rate: Decimal::from(20),
            invoice_prefix: "INV".to_string(),
            invoice_due_days: 7,
            sweep_interval_secs: 3600,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| BillingError::Config(format!("invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
