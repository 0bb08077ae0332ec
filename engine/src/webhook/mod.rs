//! Webhook ingestion.
//!
//! Providers deliver status events at-least-once, possibly out of order
//! and in arbitrary shapes. Each event is classified, mapped to the
//! canonical vocabulary, recorded in the ledger and propagated into
//! suppression state. One unrecognized event never fails the batch.

pub mod classify;
pub mod mapping;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::model::{BounceKind, CampaignEvent, CampaignId, Channel, ContactId, EventType};
use crate::reconcile::{Applied, Reconciler};
use crate::store::MemoryStore;
use crate::suppress::Suppressor;

use mapping::VendorMapping;

/// Per-channel counts returned to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub email: usize,
    pub sms: usize,
    pub dropped: usize,
}

pub struct WebhookProcessor {
    store: Arc<MemoryStore>,
    reconciler: Reconciler,
    suppressor: Suppressor,
}

impl WebhookProcessor {
    pub fn new(store: Arc<MemoryStore>, reconciler: Reconciler, suppressor: Suppressor) -> Self {
        Self {
            store,
            reconciler,
            suppressor,
        }
    }

    /// Ingest one webhook body of any supported shape.
    pub fn ingest(&self, payload: &Value) -> IngestSummary {
        let events = classify::explode(payload);
        let mut summary = IngestSummary::default();

        for event in &events {
            match self.process_one(event) {
                Some(Channel::Email) => summary.email += 1,
                Some(Channel::Sms) => summary.sms += 1,
                None => summary.dropped += 1,
            }
        }

        info!(
            received = events.len(),
            email = summary.email,
            sms = summary.sms,
            dropped = summary.dropped,
            "webhook_batch_processed"
        );
        summary
    }

    /// Process a single event object; returns the channel it was counted
    /// against, or `None` when dropped.
    fn process_one(&self, event: &Value) -> Option<Channel> {
        let channel = classify::classify_channel(event, &self.store);

        // An opt-out keyword in the message body wins over the declared
        // status.
        let keyword_optout = classify::message_body(event)
            .map(mapping::is_optout_keyword)
            .unwrap_or(false);

        let mapping = if keyword_optout {
            VendorMapping::Event {
                event_type: EventType::Optout,
                bounce_kind: None,
            }
        } else {
            let name = classify::event_name(event)?;
            match mapping::map_vendor_event(name) {
                Some(mapping) => mapping,
                None => {
                    warn!(event_name = %name, channel = ?channel, "webhook_event_unmapped");
                    return None;
                }
            }
        };

        let contact_id = self.resolve_contact(event, channel);

        match mapping {
            VendorMapping::Subscribe => {
                let Some(contact_id) = contact_id else {
                    warn!("webhook_subscribe_without_contact");
                    return None;
                };
                if let Err(e) = self.suppressor.resubscribe(contact_id) {
                    warn!(contact_id = %contact_id, error = %e, "webhook_resubscribe_failed");
                    return None;
                }
                Some(channel)
            }
            VendorMapping::Event {
                event_type,
                bounce_kind,
            } => {
                let bounce_kind = bounce_kind
                    .or_else(|| {
                        mapping::bounce_kind_from_severity(
                            event.get("severity").and_then(Value::as_str),
                        )
                    })
                    .or(if event_type == EventType::Bounced {
                        Some(BounceKind::Hard)
                    } else {
                        None
                    });

                let campaign_id = classify::resolve_campaign(event, &self.store).map(|(id, _)| id);
                let recorded =
                    self.record(campaign_id, contact_id, event_type, bounce_kind, event);
                let suppressed = if has_suppression_consequence(event_type) {
                    self.suppress(contact_id, channel, event_type, bounce_kind)
                } else {
                    false
                };

                if recorded || suppressed {
                    Some(channel)
                } else {
                    warn!(
                        event_type = ?event_type,
                        channel = ?channel,
                        "webhook_event_unresolvable"
                    );
                    None
                }
            }
        }
    }

    /// Append the event to the campaign ledger, when the campaign is known.
    fn record(
        &self,
        campaign_id: Option<CampaignId>,
        contact_id: Option<ContactId>,
        event_type: EventType,
        bounce_kind: Option<BounceKind>,
        raw: &Value,
    ) -> bool {
        let Some(campaign_id) = campaign_id else {
            return false;
        };
        let mut event = CampaignEvent::new(campaign_id, contact_id, event_type).with_raw(raw.clone());
        if let Some(kind) = bounce_kind {
            event = event.with_bounce_kind(kind);
        }
        // A duplicate still counts as handled; the provider retried and we
        // idempotently ignored it.
        matches!(self.reconciler.apply(event), Applied::Recorded | Applied::Duplicate)
    }

    /// Propagate suppression consequences, when the contact is known.
    ///
    /// Runs even without a campaign: an inbound SAIR reply carries no
    /// campaign reference but must still opt the contact out.
    fn suppress(
        &self,
        contact_id: Option<ContactId>,
        channel: Channel,
        event_type: EventType,
        bounce_kind: Option<BounceKind>,
    ) -> bool {
        let Some(contact_id) = contact_id else {
            return false;
        };
        if let Err(e) = self
            .suppressor
            .apply(contact_id, channel, event_type, bounce_kind)
        {
            warn!(contact_id = %contact_id, error = %e, "webhook_suppression_failed");
            return false;
        }
        true
    }

    fn resolve_contact(&self, event: &Value, channel: Channel) -> Option<ContactId> {
        match channel {
            Channel::Email => classify::email_of(event)
                .and_then(|email| self.store.contact_by_email(email)),
            Channel::Sms => classify::phone_of(event)
                .and_then(|phone| self.store.contact_by_phone(phone)),
        }
    }
}

/// Types that change contact suppression state.
fn has_suppression_consequence(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::Bounced | EventType::Complained | EventType::Unsubscribed | EventType::Optout
    )
}
