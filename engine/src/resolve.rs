//! Recipient resolution.
//!
//! Turns a campaign's include/exclude lists plus per-contact suppression
//! state into the exact set of eligible recipients. Pure with respect to
//! the store: safe to call repeatedly (for cost estimation, display
//! counts) without side effects.

use std::collections::HashSet;

use tracing::debug;

use crate::model::{Campaign, Channel, Contact, ContactId, ContactStatus};
use crate::send::sms::normalize_e164;
use crate::store::MemoryStore;

/// Resolve the eligible recipients of a campaign.
///
/// A contact qualifies iff it belongs to at least one include list, belongs
/// to none of the exclude lists, is not suppressed for the campaign's
/// channel, and has a valid non-empty address for that channel. The result
/// is sorted by contact id so batch partitioning is stable across calls.
pub fn resolve_recipients(
    store: &MemoryStore,
    campaign: &Campaign,
    default_country_code: &str,
) -> Vec<ContactId> {
    let mut included: HashSet<ContactId> = HashSet::new();
    for list_id in &campaign.include_list_ids {
        included.extend(store.list_members(*list_id));
    }

    let mut excluded: HashSet<ContactId> = HashSet::new();
    for list_id in &campaign.exclude_list_ids {
        excluded.extend(store.list_members(*list_id));
    }

    let mut eligible: Vec<ContactId> = included
        .into_iter()
        .filter(|id| !excluded.contains(id))
        .filter(|id| match store.contact(*id) {
            Some(contact) => is_eligible(&contact, campaign.channel, default_country_code),
            None => false,
        })
        .collect();

    eligible.sort();

    debug!(
        campaign_id = %campaign.id,
        channel = ?campaign.channel,
        eligible = eligible.len(),
        "recipients_resolved"
    );

    eligible
}

/// Suppression and address validity are channel-scoped: an SMS opt-out
/// never affects email eligibility and vice versa.
fn is_eligible(contact: &Contact, channel: Channel, default_country_code: &str) -> bool {
    match channel {
        Channel::Email => {
            if contact.status != ContactStatus::Active {
                return false;
            }
            matches!(contact.email.as_deref(), Some(email) if is_plausible_email(email))
        }
        Channel::Sms => {
            if contact.sms_optout {
                return false;
            }
            matches!(
                contact.phone.as_deref(),
                Some(phone) if normalize_e164(phone, default_country_code).is_ok()
            )
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}
