//! Trailing-window cache hit-rate tracking
//!
//! Feeds the routing optimizer: operations that are mostly served from
//! cache get routed to the cheapest model, since most calls never reach a
//! provider. Counters are process-local daily buckets; they bias routing
//! only, never correctness.

use crate::types::OperationType;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Days of history kept per operation
const WINDOW_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy)]
struct DayBucket {
    day: NaiveDate,
    hits: u64,
    lookups: u64,
}

/// Per-operation hit/lookup counters over a trailing window
#[derive(Debug, Default)]
pub struct HitRateTracker {
    buckets: Mutex<HashMap<OperationType, Vec<DayBucket>>>,
}

impl HitRateTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_hit(&self, operation: OperationType) {
        self.record(operation, true);
    }

    /// Record a cache miss
    pub fn record_miss(&self, operation: OperationType) {
        self.record(operation, false);
    }

    /// Hit rate over the trailing window, in `[0, 1]`. Zero when no lookups
    /// were observed.
    pub fn hit_rate(&self, operation: OperationType) -> f64 {
        let today = Utc::now().date_naive();
        let buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(days) = buckets.get(&operation) else {
            return 0.0;
        };

        let mut hits = 0u64;
        let mut lookups = 0u64;
        for bucket in days {
            if Self::in_window(bucket.day, today) {
                hits += bucket.hits;
                lookups += bucket.lookups;
            }
        }
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }

    fn record(&self, operation: OperationType, hit: bool) {
        let today = Utc::now().date_naive();
        let mut buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            Err(poisoned) => poisoned.into_inner(),
        };
        let days = buckets.entry(operation).or_default();

        days.retain(|b| Self::in_window(b.day, today));
        match days.iter_mut().find(|b| b.day == today) {
            Some(bucket) => {
                bucket.lookups += 1;
                if hit {
                    bucket.hits += 1;
                }
            }
            None => days.push(DayBucket {
                day: today,
                hits: u64::from(hit),
                lookups: 1,
            }),
        }
    }

    fn in_window(day: NaiveDate, today: NaiveDate) -> bool {
        (today - day).num_days() < WINDOW_DAYS as i64
    }
}
