//! Suppression management.
//!
//! Propagates bounce/complaint/unsubscribe/opt-out events into contact
//! status so future recipient resolution excludes them. Suppression is
//! channel-scoped: an SMS opt-out never affects email eligibility and
//! vice versa.
//!
//! Hard bounces and complaints are permanent; only the explicit
//! `reactivate` operation clears them. Re-subscription clears an
//! unsubscribe only, and only when enabled by configuration.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::EngineError;
use crate::model::{BounceKind, Channel, ContactId, ContactStatus, EventType};
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct Suppressor {
    store: Arc<MemoryStore>,
    honor_resubscribe: bool,
}

impl Suppressor {
    pub fn new(store: Arc<MemoryStore>, honor_resubscribe: bool) -> Self {
        Self {
            store,
            honor_resubscribe,
        }
    }

    /// Apply the suppression consequences of a recorded event.
    pub fn apply(
        &self,
        contact_id: ContactId,
        channel: Channel,
        event_type: EventType,
        bounce_kind: Option<BounceKind>,
    ) -> Result<(), EngineError> {
        match (event_type, channel) {
            (EventType::Bounced, Channel::Email) => {
                // Soft bounces count against the campaign but do not
                // suppress the contact.
                if bounce_kind == Some(BounceKind::Hard) {
                    self.mark(contact_id, ContactStatus::Bounced)?;
                }
            }
            (EventType::Complained, Channel::Email) => {
                self.mark(contact_id, ContactStatus::Complained)?;
            }
            (EventType::Unsubscribed, Channel::Email) => {
                // Bounce/complaint suppression outranks an unsubscribe.
                self.store.try_update_contact(contact_id, |contact| {
                    if contact.status == ContactStatus::Active {
                        contact.status = ContactStatus::Unsubscribed;
                        contact.suppressed_at = Some(Utc::now());
                    }
                })?;
                info!(contact_id = %contact_id, "contact_unsubscribed");
            }
            (EventType::Optout, _) | (EventType::Unsubscribed, Channel::Sms) => {
                self.store.try_update_contact(contact_id, |contact| {
                    contact.sms_optout = true;
                    contact.suppressed_at = Some(Utc::now());
                })?;
                info!(contact_id = %contact_id, "contact_sms_optout");
            }
            _ => {}
        }
        Ok(())
    }

    /// Honor a `subscribe` signal: clears an unsubscribe, never a bounce
    /// or complaint.
    pub fn resubscribe(&self, contact_id: ContactId) -> Result<(), EngineError> {
        if !self.honor_resubscribe {
            info!(contact_id = %contact_id, "resubscribe_ignored_by_config");
            return Ok(());
        }
        self.store.try_update_contact(contact_id, |contact| {
            if contact.status == ContactStatus::Unsubscribed {
                contact.status = ContactStatus::Active;
                contact.suppressed_at = None;
                info!(contact_id = %contact.id, "contact_resubscribed");
            }
        })
    }

    /// Manual intervention path: clears any suppression, including bounces
    /// and complaints.
    pub fn reactivate(&self, contact_id: ContactId) -> Result<(), EngineError> {
        self.store.try_update_contact(contact_id, |contact| {
            contact.status = ContactStatus::Active;
            contact.sms_optout = false;
            contact.suppressed_at = None;
            info!(contact_id = %contact.id, "contact_reactivated");
        })
    }

    fn mark(&self, contact_id: ContactId, status: ContactStatus) -> Result<(), EngineError> {
        self.store.try_update_contact(contact_id, |contact| {
            contact.status = status;
            contact.suppressed_at = Some(Utc::now());
        })?;
        info!(contact_id = %contact_id, status = ?status, "contact_suppressed");
        Ok(())
    }
}
