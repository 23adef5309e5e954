//! Per-user monthly budget enforcement

use crate::error::StewardResult;
use crate::storage::UsageStore;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Subscription tier controlling the monthly spend ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaTier {
    /// Trial users
    Free,
    /// Entry paid plan
    Starter,
    /// Standard paid plan
    Pro,
    /// Highest plan
    Business,
}

impl QuotaTier {
    /// Monthly spend ceiling in USD
    pub fn monthly_limit_usd(&self) -> f64 {
        match self {
            QuotaTier::Free => 5.0,
            QuotaTier::Starter => 20.0,
            QuotaTier::Pro => 100.0,
            QuotaTier::Business => 500.0,
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy)]
pub struct QuotaCheck {
    /// Whether the request fits in the budget (equality allowed)
    pub allowed: bool,
    /// Spend so far this calendar month
    pub current_usage: f64,
    /// The tier's monthly ceiling
    pub limit: f64,
    /// First instant of the next calendar month
    pub reset_date: DateTime<Utc>,
}

/// Enforces tier-based monthly budgets against recorded usage
#[derive(Clone)]
pub struct QuotaManager {
    usage: Arc<dyn UsageStore>,
    default_tier: QuotaTier,
    user_tiers: HashMap<String, QuotaTier>,
}

impl QuotaManager {
    /// Create a manager over a usage store
    pub fn new(
        usage: Arc<dyn UsageStore>,
        default_tier: QuotaTier,
        user_tiers: HashMap<String, QuotaTier>,
    ) -> Self {
        Self {
            usage,
            default_tier,
            user_tiers,
        }
    }

    /// Tier for a user
    pub fn tier_for(&self, user_id: &str) -> QuotaTier {
        self.user_tiers
            .get(user_id)
            .copied()
            .unwrap_or(self.default_tier)
    }

    /// Check whether a request with `estimated_cost` fits in the user's
    /// monthly budget. Spending exactly up to the limit is allowed; only
    /// strictly exceeding it is denied.
    pub async fn check_user_quota(
        &self,
        user_id: &str,
        estimated_cost: f64,
    ) -> StewardResult<QuotaCheck> {
        let now = Utc::now();
        let (month_start, next_month) = month_bounds(now);

        let records = self
            .usage
            .in_range(month_start, next_month, Some(user_id))
            .await?;
        let current_usage: f64 = records.iter().map(|r| r.cost_usd).sum();

        let limit = self.tier_for(user_id).monthly_limit_usd();
        Ok(QuotaCheck {
            allowed: current_usage + estimated_cost <= limit,
            current_usage,
            limit,
            reset_date: next_month,
        })
    }
}

/// `[first instant of this month, first instant of next month)`
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    let start = first_of_month(year, month);
    let end = first_of_month(next_year, next_month);
    (start, end)
}

fn first_of_month(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("first of month is a valid date")
        .and_utc()
}
