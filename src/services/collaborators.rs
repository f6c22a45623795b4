//! Contracts for the external collaborators the engine depends on.
//!
//! The engine only needs these narrow interfaces; real implementations
//! (directory service, referral program, mailers) live elsewhere.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account(&self, id: Uuid) -> Result<Account>;
}

/// Referral-program policy. Activation notification is fire-and-forget: the
/// lifecycle logs a failure here and never propagates it.
#[async_trait]
pub trait ReferralPolicy: Send + Sync {
    /// Trial length in days for this account, referral extensions included.
    async fn trial_days_for(&self, account_id: Uuid) -> i64;

    /// Report a trial converting to a paid subscription.
    async fn on_subscription_activated(&self, account_id: Uuid) -> anyhow::Result<()>;
}

pub struct InMemoryAccountDirectory {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, email: &str, name: &str) -> Account {
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(account.id, account.clone());
        account
    }
}

impl Default for InMemoryAccountDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_account(&self, id: Uuid) -> Result<Account> {
        self.accounts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(BillingError::AccountNotFound(id))
    }
}

/// Fixed-length trials, no referral program attached.
pub struct DefaultReferralPolicy {
    trial_days: i64,
}

impl DefaultReferralPolicy {
    pub fn new(trial_days: i64) -> Self {
        Self { trial_days }
    }
}

#[async_trait]
impl ReferralPolicy for DefaultReferralPolicy {
    async fn trial_days_for(&self, _account_id: Uuid) -> i64 {
        self.trial_days
    }

    async fn on_subscription_activated(&self, _account_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }
}
