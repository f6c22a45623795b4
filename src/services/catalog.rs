use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::{BillingError, Result};
use crate::models::plan::{BillingCycle, Plan, Price};

/// Read-only lookup of plans and their per-cycle prices.
///
/// Built once at startup and shared immutably; prices are keyed by
/// (plan, cycle), so there can only ever be one active price per pair.
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
    prices: HashMap<(String, BillingCycle), Price>,
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self {
            plans: HashMap::new(),
            prices: HashMap::new(),
        }
    }

    pub fn add_plan(&mut self, plan: Plan) {
        self.plans.insert(plan.code.clone(), plan);
    }

    pub fn add_price(&mut self, price: Price) {
        self.prices
            .insert((price.plan_code.clone(), price.cycle), price);
    }

    /// Look up an active plan by code.
    pub fn find_plan(&self, code: &str) -> Result<&Plan> {
        self.plans
            .get(code)
            .filter(|p| p.active)
            .ok_or_else(|| BillingError::PlanNotFound(code.to_string()))
    }

    /// Look up the active price for a (plan, cycle) pair.
    pub fn find_price(&self, plan_code: &str, cycle: BillingCycle) -> Result<&Price> {
        self.prices
            .get(&(plan_code.to_string(), cycle))
            .filter(|p| p.active)
            .ok_or_else(|| BillingError::PriceNotFound {
                plan_code: plan_code.to_string(),
                cycle,
            })
    }

    /// Built-in catalog used by the scheduler binary and tests.
    pub fn seed_default() -> Self {
        let mut catalog = Self::new();

        catalog.add_plan(Plan {
            code: "starter".to_string(),
            name: "Starter".to_string(),
            tier_order: 1,
            max_stores: Some(1),
            active: true,
        });
        catalog.add_plan(Plan {
            code: "growth".to_string(),
            name: "Growth".to_string(),
            tier_order: 2,
            max_stores: Some(5),
            active: true,
        });
        catalog.add_plan(Plan {
            code: "scale".to_string(),
            name: "Scale".to_string(),
            tier_order: 3,
            max_stores: None,
            active: true,
        });

        let prices: &[(&str, BillingCycle, i64)] = &[
            ("starter", BillingCycle::Monthly, 99_00),
            ("starter", BillingCycle::Quarterly, 267_00),
            ("starter", BillingCycle::SemiAnnual, 499_00),
            ("growth", BillingCycle::Monthly, 299_00),
            ("growth", BillingCycle::Quarterly, 807_00),
            ("growth", BillingCycle::SemiAnnual, 1_499_00),
            ("scale", BillingCycle::Monthly, 599_00),
            ("scale", BillingCycle::Quarterly, 1_617_00),
            ("scale", BillingCycle::SemiAnnual, 2_999_00),
        ];
        for (code, cycle, cents) in prices {
            catalog.add_price(Price {
                plan_code: code.to_string(),
                cycle: *cycle,
                amount: Decimal::new(*cents, 2),
                currency: "USD".to_string(),
                active: true,
            });
        }

        catalog
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new()
    }
}
