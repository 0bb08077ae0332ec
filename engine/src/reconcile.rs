//! Event deduplication and statistics reconciliation.
//!
//! The ledger is the source of truth; the cached per-campaign counters are
//! derived from it. Counted-once events increment their counter exactly
//! once because the ledger's uniqueness check decides a single winner
//! under contention. Unique open/click counters are always *set* from a
//! distinct-count over the ledger, never incremented, and the set happens
//! in the same critical section as the ledger insert, so concurrent
//! applications cannot write a stale count over a fresher one.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{CampaignEvent, CampaignId, CampaignStats, EventType};
use crate::store::{MemoryStore, RecordOutcome};

/// What happened to one applied event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Recorded,
    /// Duplicate delivery of a counted-once event; silently ignored.
    Duplicate,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<MemoryStore>,
}

impl Reconciler {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Record an event in the ledger and fold it into the campaign's
    /// cached counters, in one critical section.
    pub fn apply(&self, event: CampaignEvent) -> Applied {
        let campaign_id = event.campaign_id;
        let event_type = event.event_type;
        // Counted-once events without a resolved contact are kept in the
        // ledger for audit but cannot be safely counted.
        let countable = !(event_type.is_counted_once() && event.contact_id.is_none());

        let outcome = self
            .store
            .record_event_with(event, |campaign, unique_contacts| {
                if countable {
                    bump_counters(&mut campaign.stats, event_type, unique_contacts);
                }
            });

        match outcome {
            Ok(RecordOutcome::Duplicate) => {
                info!(
                    campaign_id = %campaign_id,
                    event_type = ?event_type,
                    "event_duplicate_ignored"
                );
                Applied::Duplicate
            }
            Ok(RecordOutcome::Recorded { .. }) => {
                if !countable {
                    warn!(
                        campaign_id = %campaign_id,
                        event_type = ?event_type,
                        "event_without_contact_not_counted"
                    );
                }
                Applied::Recorded
            }
            Err(e) => {
                warn!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "event_counter_update_failed"
                );
                Applied::Recorded
            }
        }
    }

    /// Recompute every cached counter from the ledger.
    ///
    /// Repair mechanism: the result is written back to the campaign and
    /// returned. `total_recipients` is not ledger-derived and is preserved.
    pub fn refresh_stats(&self, campaign_id: CampaignId) -> Result<CampaignStats, EngineError> {
        let events = self.store.events_for(campaign_id);

        let mut stats = CampaignStats::default();
        for event in &events {
            if event.event_type.is_counted_once() && event.contact_id.is_none() {
                continue;
            }
            bump_counters(&mut stats, event.event_type, None);
        }
        stats.unique_opens = self
            .store
            .distinct_contacts(campaign_id, &[EventType::Opened]);
        stats.unique_clicks = self
            .store
            .distinct_contacts(campaign_id, &[EventType::Clicked]);

        let refreshed = self.store.try_update_campaign(campaign_id, |campaign| {
            stats.total_recipients = campaign.stats.total_recipients;
            campaign.stats = stats.clone();
            Ok(campaign.stats.clone())
        })?;

        info!(campaign_id = %campaign_id, "campaign_stats_refreshed");
        Ok(refreshed)
    }
}

fn bump_counters(stats: &mut CampaignStats, event_type: EventType, unique: Option<u64>) {
    match event_type {
        EventType::Sent => stats.total_sent += 1,
        EventType::Delivered => stats.total_delivered += 1,
        EventType::Bounced | EventType::Failed => stats.total_failed_or_bounced += 1,
        EventType::Complained => stats.total_complained += 1,
        EventType::Unsubscribed | EventType::Optout => stats.total_unsubscribed += 1,
        EventType::Opened => {
            stats.total_opened += 1;
            if let Some(unique) = unique {
                stats.unique_opens = unique;
            }
        }
        EventType::Clicked => {
            stats.total_clicked += 1;
            if let Some(unique) = unique {
                stats.unique_clicks = unique;
            }
        }
    }
}
