//! Subscription billing lifecycle engine.
//!
//! Covers the full life of a subscription: trial, activation, renewal with
//! invoice generation, dunning through grace and suspension, and terminal
//! cancellation or expiry. State lives in an in-memory store behind per-row
//! locks; payment gateways and HTTP surfaces sit outside this crate and talk
//! to it through [`services::lifecycle::SubscriptionLifecycle`].

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod tasks;

pub use config::BillingConfig;
pub use error::{BillingError, Result};
pub use services::catalog::PlanCatalog;
pub use services::invoice::InvoiceGenerator;
pub use services::lifecycle::SubscriptionLifecycle;
pub use services::retry::PaymentRetryScheduler;
pub use services::store::BillingStore;
