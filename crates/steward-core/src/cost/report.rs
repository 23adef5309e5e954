//! Cost reporting and spend-pattern recommendations

use crate::error::StewardResult;
use crate::storage::UsageStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How many top spenders a report lists
const TOP_USERS: usize = 5;

/// One operation dominating spend suggests caching
const OPERATION_SHARE_THRESHOLD: f64 = 0.3;
/// One provider dominating spend suggests diversifying
const PROVIDER_SHARE_THRESHOLD: f64 = 0.8;
/// Failure rate above this suggests error-handling work
const FAILURE_RATE_THRESHOLD: f64 = 0.1;
/// Hit rate below this suggests query normalization
const HIT_RATE_THRESHOLD: f64 = 0.2;

/// A user and their spend within the report range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpend {
    /// User identifier
    pub user_id: String,
    /// Spend in USD
    pub cost_usd: f64,
}

/// Aggregated spend over a date range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    /// Start of the range (inclusive)
    pub start: DateTime<Utc>,
    /// End of the range (exclusive)
    pub end: DateTime<Utc>,
    /// Total spend in USD
    pub total_cost: f64,
    /// Spend by provider
    pub cost_by_provider: HashMap<String, f64>,
    /// Spend by operation type
    pub cost_by_operation: HashMap<String, f64>,
    /// Top spenders, highest first
    pub top_users: Vec<UserSpend>,
    /// Fraction of attempts that failed
    pub failure_rate: f64,
    /// Cache hit rate supplied by the caller
    pub cache_hit_rate: f64,
    /// Threshold-driven guidance
    pub recommendations: Vec<String>,
}

/// Builds cost reports from the usage store
#[derive(Clone)]
pub struct CostReporter {
    usage: Arc<dyn UsageStore>,
}

impl CostReporter {
    /// Create a reporter over a usage store
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self { usage }
    }

    /// Aggregate spend within `[start, end)`, optionally for one user.
    /// `cache_hit_rate` comes from the cache layer and only drives the
    /// recommendation thresholds.
    pub async fn generate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
        cache_hit_rate: f64,
    ) -> StewardResult<CostReport> {
        let records = self.usage.in_range(start, end, user_id).await?;

        let mut total_cost = 0.0;
        let mut cost_by_provider: HashMap<String, f64> = HashMap::new();
        let mut cost_by_operation: HashMap<String, f64> = HashMap::new();
        let mut cost_by_user: HashMap<String, f64> = HashMap::new();
        let mut failures = 0usize;

        for record in &records {
            total_cost += record.cost_usd;
            *cost_by_provider
                .entry(record.provider.to_string())
                .or_default() += record.cost_usd;
            *cost_by_operation
                .entry(record.operation.to_string())
                .or_default() += record.cost_usd;
            *cost_by_user.entry(record.user_id.clone()).or_default() += record.cost_usd;
            if !record.success {
                failures += 1;
            }
        }

        let failure_rate = if records.is_empty() {
            0.0
        } else {
            failures as f64 / records.len() as f64
        };

        let mut top_users: Vec<UserSpend> = cost_by_user
            .into_iter()
            .map(|(user_id, cost_usd)| UserSpend { user_id, cost_usd })
            .collect();
        top_users.sort_by(|a, b| b.cost_usd.total_cmp(&a.cost_usd));
        top_users.truncate(TOP_USERS);

        let recommendations = recommendations(
            total_cost,
            &cost_by_provider,
            &cost_by_operation,
            failure_rate,
            cache_hit_rate,
        );

        Ok(CostReport {
            start,
            end,
            total_cost,
            cost_by_provider,
            cost_by_operation,
            top_users,
            failure_rate,
            cache_hit_rate,
            recommendations,
        })
    }
}

fn recommendations(
    total_cost: f64,
    by_provider: &HashMap<String, f64>,
    by_operation: &HashMap<String, f64>,
    failure_rate: f64,
    cache_hit_rate: f64,
) -> Vec<String> {
    let mut out = Vec::new();
    if total_cost > 0.0 {
        for (operation, cost) in by_operation {
            if cost / total_cost > OPERATION_SHARE_THRESHOLD {
                out.push(format!(
                    "operation '{operation}' accounts for over 30% of spend, consider caching its responses more aggressively"
                ));
            }
        }
        for (provider, cost) in by_provider {
            if cost / total_cost > PROVIDER_SHARE_THRESHOLD {
                out.push(format!(
                    "provider '{provider}' carries over 80% of spend, consider diversifying the hierarchy"
                ));
            }
        }
    }
    if failure_rate > FAILURE_RATE_THRESHOLD {
        out.push(format!(
            "failure rate is {:.0}%, review provider errors and retry policy",
            failure_rate * 100.0
        ));
    }
    if cache_hit_rate < HIT_RATE_THRESHOLD {
        out.push(format!(
            "cache hit rate is {:.0}%, consider normalizing queries so identical requests collide",
            cache_hit_rate * 100.0
        ));
    }
    out
}
