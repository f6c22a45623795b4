use std::sync::Arc;

use dotenv::dotenv;
use log::info;

use billing_engine::config::BillingConfig;
use billing_engine::services::catalog::PlanCatalog;
use billing_engine::services::collaborators::{DefaultReferralPolicy, InMemoryAccountDirectory};
use billing_engine::services::lifecycle::SubscriptionLifecycle;
use billing_engine::services::store::BillingStore;
use billing_engine::tasks::sweep::start_sweep_task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = BillingConfig::from_env()?;
    info!(
        "Starting billing scheduler (sweep every {}s, {}% tax, {} day grace)",
        config.sweep_interval_secs, config.tax_rate, config.grace_period_days
    );

    let store = Arc::new(BillingStore::new());
    let catalog = Arc::new(PlanCatalog::seed_default());
    let accounts = Arc::new(InMemoryAccountDirectory::new());
    let referrals = Arc::new(DefaultReferralPolicy::new(config.trial_days));

    let lifecycle = Arc::new(SubscriptionLifecycle::new(
        store, catalog, accounts, referrals, config,
    ));

    start_sweep_task(lifecycle).await;
    Ok(())
}
