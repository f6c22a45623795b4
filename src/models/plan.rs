use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;

/// Billing cycle length for a price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    SemiAnnual,
}

impl BillingCycle {
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::SemiAnnual => 6,
        }
    }

    pub fn from_months(months: u32) -> Option<Self> {
        match months {
            1 => Some(BillingCycle::Monthly),
            3 => Some(BillingCycle::Quarterly),
            6 => Some(BillingCycle::SemiAnnual),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingCycle::Monthly => write!(f, "monthly"),
            BillingCycle::Quarterly => write!(f, "quarterly"),
            BillingCycle::SemiAnnual => write!(f, "semi-annual"),
        }
    }
}

/// Immutable catalog entry. Seeded administratively, never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    pub name: String,
    /// Monotonic rank used to decide upgrade vs. downgrade.
    pub tier_order: i32,
    /// None = unlimited stores.
    pub max_stores: Option<u32>,
    pub active: bool,
}

/// One price per (plan, billing cycle) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub plan_code: String,
    pub cycle: BillingCycle,
    pub amount: Decimal,
    pub currency: String,
    pub active: bool,
}
