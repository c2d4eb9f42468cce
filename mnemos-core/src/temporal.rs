//! Timestamps for graph records
//!
//! Every node and edge carries creation, modification and access times.
//! Decay eligibility and the recency component of search ranking are both
//! derived from these.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle timestamps for a node or edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Last read through `get` or `query`
    pub accessed_at: DateTime<Utc>,
    /// Last decay step, if any
    #[serde(default)]
    pub decayed_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    /// All three timestamps set to now
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// All three timestamps set to `at`
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: at,
            accessed_at: at,
            decayed_at: None,
        }
    }

    /// Record a mutation
    pub fn touch_updated(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a read
    pub fn touch_accessed(&mut self) {
        self.accessed_at = Utc::now();
    }

    /// Time since the last read
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.accessed_at
    }

    /// True if the last read happened before `now - interval`
    pub fn idle_longer_than(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.idle_for(now) > interval
    }

    /// True unless a decay step already ran within `interval` of `now`
    pub fn decay_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.decayed_at.map_or(true, |at| now - at > interval)
    }

    /// Age since creation
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

impl Default for Timestamps {
    fn default() -> Self {
        Self::now()
    }
}

/// Linear recency score in [0, 1]: 1.0 when accessed just now, 0.0 once
/// the access is older than `window`.
pub fn recency_fraction(accessed_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> f32 {
    let window_ms = window.num_milliseconds();
    if window_ms <= 0 {
        return 0.0;
    }
    let elapsed_ms = (now - accessed_at).num_milliseconds().max(0);
    (1.0 - elapsed_ms as f64 / window_ms as f64).clamp(0.0, 1.0) as f32
}

/// Multiplicative decay step, clamped to [0, 1]
pub fn decayed(value: f32, decay_rate: f32) -> f32 {
    (value * (1.0 - decay_rate.clamp(0.0, 1.0))).clamp(0.0, 1.0)
}
