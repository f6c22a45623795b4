use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{error, info};

use crate::models::subscription::SubscriptionStatus;
use crate::services::lifecycle::SubscriptionLifecycle;
use crate::services::retry::MAX_PAYMENT_ATTEMPTS;

/// Counters for one sweep pass, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub trials_ended: usize,
    pub renewed: usize,
    pub cancelled: usize,
    pub past_due: usize,
    pub suspended: usize,
    pub expired: usize,
    pub errors: usize,
}

/// One pass over the whole store, driving every time-based transition.
///
/// Each subscription is processed on its own; a failure is logged and counted
/// but never stops the pass.
pub fn run_billing_sweep(lifecycle: &SubscriptionLifecycle) -> SweepOutcome {
    let now = Utc::now();
    let mut outcome = SweepOutcome::default();
    let store = lifecycle.store();

    // Trials that ran out. A trial with a scheduled cancellation goes through
    // renewal, which processes the cancellation instead of charging.
    for sub in store.trials_ended_before(now) {
        let result = if sub.cancel_at_period_end {
            lifecycle.renew_subscription(sub.id).map(|s| {
                outcome.cancelled += 1;
                s
            })
        } else {
            lifecycle.end_trial(sub.id).map(|s| {
                outcome.trials_ended += 1;
                s
            })
        };
        if let Err(e) = result {
            error!("Sweep failed to end trial {}: {}", sub.id, e);
            outcome.errors += 1;
        }
    }

    // Periods that lapsed: renew, or process the scheduled cancellation.
    for sub in store.renewals_due_before(now) {
        match lifecycle.renew_subscription(sub.id) {
            Ok(renewed) if renewed.status.is_terminal() => outcome.cancelled += 1,
            Ok(_) => outcome.renewed += 1,
            Err(e) => {
                error!("Sweep failed to renew subscription {}: {}", sub.id, e);
                outcome.errors += 1;
            }
        }
    }

    // Charges that ran out of retries with the invoice still failed. First
    // pass takes the subscription past due; if a later pass finds it still
    // exhausted, the grace window cannot be recovered by a retry and the
    // subscription is suspended.
    for id in store.payment_exhausted_subscriptions(MAX_PAYMENT_ATTEMPTS) {
        let Some(sub) = store.find_subscription(id) else {
            continue;
        };
        let result = match sub.status {
            SubscriptionStatus::Active => lifecycle.mark_past_due(id).map(|_| {
                outcome.past_due += 1;
            }),
            SubscriptionStatus::PastDue => lifecycle.suspend_subscription(id).map(|_| {
                outcome.suspended += 1;
            }),
            _ => continue,
        };
        if let Err(e) = result {
            error!("Sweep failed to dun subscription {}: {}", id, e);
            outcome.errors += 1;
        }
    }

    // Grace windows that lapsed without payment.
    for sub in store.grace_expired_before(now) {
        match lifecycle.suspend_subscription(sub.id) {
            Ok(_) => outcome.suspended += 1,
            Err(e) => {
                error!("Sweep failed to suspend subscription {}: {}", sub.id, e);
                outcome.errors += 1;
            }
        }
    }

    // Suspensions that sat unpaid past the cutoff.
    let cutoff = now - Duration::days(lifecycle.config().suspension_cutoff_days);
    for sub in store.suspended_stale_before(cutoff) {
        match lifecycle.expire_subscription(sub.id) {
            Ok(_) => outcome.expired += 1,
            Err(e) => {
                error!("Sweep failed to expire subscription {}: {}", sub.id, e);
                outcome.errors += 1;
            }
        }
    }

    info!(
        "Billing sweep done: {} trials ended, {} renewed, {} cancelled, {} past due, {} suspended, {} expired, {} errors",
        outcome.trials_ended,
        outcome.renewed,
        outcome.cancelled,
        outcome.past_due,
        outcome.suspended,
        outcome.expired,
        outcome.errors
    );
    outcome
}

/// Run the sweep on a fixed interval until the task is aborted.
pub async fn start_sweep_task(lifecycle: Arc<SubscriptionLifecycle>) {
    let period = std::time::Duration::from_secs(lifecycle.config().sweep_interval_secs);
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        run_billing_sweep(&lifecycle);
    }
}
