use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentAttemptStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One charge attempt against an invoice. Created per attempt; mutated only
/// by the retry scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentAttemptStatus,
    /// 1-based.
    pub attempt_number: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn new(invoice_id: Uuid, amount: Decimal, attempt_number: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            amount,
            status: PaymentAttemptStatus::Pending,
            attempt_number,
            next_retry_at: None,
            failure_code: None,
            failure_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}
