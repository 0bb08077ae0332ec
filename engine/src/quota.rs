//! Per-provider send-rate enforcement.
//!
//! Each provider credential carries a daily and an hourly limit. The guard
//! keeps a counter per window and performs check-and-increment as one
//! critical section, so concurrent batch workers cannot overshoot a limit
//! through a read-then-write race.
//!
//! Windows are anchored to wall-clock day/hour starts, not to enqueue
//! time. A worker that observes a stale window resets it and continues.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tracing::{debug, info};

use crate::model::{Provider, ProviderId};

/// Decision for one attempted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    DailyExhausted,
    HourlyExhausted,
}

impl QuotaDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug)]
struct QuotaWindow {
    sends_today: u64,
    sends_this_hour: u64,
    day: NaiveDate,
    hour: (NaiveDate, u32),
    last_reset_at: DateTime<Utc>,
    last_hour_reset_at: DateTime<Utc>,
}

/// Shared quota state across all batch workers.
pub struct QuotaGuard {
    windows: Mutex<HashMap<ProviderId, QuotaWindow>>,
}

impl QuotaGuard {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check the provider's limits and, if allowed, count the send.
    ///
    /// A rejected send is not counted; the caller defers the remaining
    /// work instead of recording spurious failures.
    pub fn try_acquire(&self, provider: &Provider, now: DateTime<Utc>) -> QuotaDecision {
        let mut windows = self.windows.lock().expect("quota lock poisoned");

        let window = windows.entry(provider.id).or_insert_with(|| QuotaWindow {
            sends_today: 0,
            sends_this_hour: 0,
            day: now.date_naive(),
            hour: (now.date_naive(), now.hour()),
            last_reset_at: now,
            last_hour_reset_at: now,
        });

        // Stale windows reset-and-continue.
        let today = now.date_naive();
        if window.day != today {
            info!(
                provider_id = %provider.id,
                sends_today = window.sends_today,
                "quota_daily_window_reset"
            );
            window.day = today;
            window.sends_today = 0;
            window.last_reset_at = now;
        }
        let this_hour = (today, now.hour());
        if window.hour != this_hour {
            debug!(
                provider_id = %provider.id,
                sends_this_hour = window.sends_this_hour,
                "quota_hourly_window_reset"
            );
            window.hour = this_hour;
            window.sends_this_hour = 0;
            window.last_hour_reset_at = now;
        }

        if window.sends_today >= provider.daily_limit {
            return QuotaDecision::DailyExhausted;
        }
        if window.sends_this_hour >= provider.hourly_limit {
            return QuotaDecision::HourlyExhausted;
        }

        window.sends_today += 1;
        window.sends_this_hour += 1;
        QuotaDecision::Allowed
    }

    /// Current usage for a provider, for display and tests.
    pub fn usage(&self, provider_id: ProviderId) -> (u64, u64) {
        let windows = self.windows.lock().expect("quota lock poisoned");
        windows
            .get(&provider_id)
            .map(|w| (w.sends_today, w.sends_this_hour))
            .unwrap_or((0, 0))
    }
}

impl Default for QuotaGuard {
    fn default() -> Self {
        Self::new()
    }
}
