use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::subscription::SubscriptionStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionEventType {
    Created,
    TrialStarted,
    TrialEnded,
    Activated,
    Upgraded,
    DowngradeScheduled,
    CancelScheduled,
    Reactivated,
    Renewed,
    Cancelled,
    PastDue,
    Suspended,
    Expired,
}

/// Append-only audit record, written in the same unit of work as the state
/// change it describes. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: SubscriptionEventType,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub previous_plan: Option<String>,
    pub new_plan: Option<String>,
    /// Opaque key-value blob; the variety of keys is open-ended by design.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionEvent {
    pub fn new(subscription_id: Uuid, event_type: SubscriptionEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_type,
            previous_status: None,
            new_status: None,
            previous_plan: None,
            new_plan: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn status_change(
        subscription_id: Uuid,
        event_type: SubscriptionEventType,
        previous: SubscriptionStatus,
        new: SubscriptionStatus,
    ) -> Self {
        let mut event = Self::new(subscription_id, event_type);
        event.previous_status = Some(previous);
        event.new_status = Some(new);
        event
    }
}
