//! In-memory authoritative state with the atomic primitives the engine
//! relies on.
//!
//! The only contended state is the event ledger (with its counted-once
//! uniqueness set) and the per-campaign aggregate counters. Both are
//! guarded here: check-then-insert on the ledger and the counter fold
//! share one critical section, and callers never observe a half-applied
//! event or a counter lagging the ledger.
//!
//! Lock ordering invariant: the ledger lock is always acquired before the
//! campaign map lock, never the other way around.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use tracing::debug;

use crate::error::EngineError;
use crate::model::{
    Campaign, CampaignEvent, CampaignId, Channel, Contact, ContactId, EventType, List, ListId,
    Provider, ProviderId,
};

/// Outcome of recording one event against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The event was appended. For repeatable types the distinct-contact
    /// count over the ledger is returned so the counter update can set
    /// (not increment) unique counters.
    Recorded { unique_contacts: Option<u64> },
    /// A counted-once event already existed for this (campaign, contact,
    /// type); the ledger is unchanged.
    Duplicate,
}

struct Ledger {
    events: Vec<CampaignEvent>,
    /// Uniqueness set for counted-once event types
    counted_once: HashSet<(CampaignId, ContactId, EventType)>,
}

/// In-memory store backing the engine.
///
/// Persistence mechanics are out of scope; this is the storage seam the
/// rest of the engine programs against.
pub struct MemoryStore {
    campaigns: RwLock<HashMap<CampaignId, Campaign>>,
    contacts: RwLock<HashMap<ContactId, Contact>>,
    lists: RwLock<HashMap<ListId, List>>,
    memberships: RwLock<HashMap<ListId, HashSet<ContactId>>>,
    providers: RwLock<HashMap<ProviderId, Provider>>,
    ledger: Mutex<Ledger>,
    /// Recipients parked after quota exhaustion or pause, per campaign
    deferred: Mutex<HashMap<CampaignId, Vec<ContactId>>>,
    /// Provider-assigned campaign references, for webhook correlation
    provider_refs: RwLock<HashMap<String, (CampaignId, Channel)>>,
    email_index: RwLock<HashMap<String, ContactId>>,
    phone_index: RwLock<HashMap<String, ContactId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            campaigns: RwLock::new(HashMap::new()),
            contacts: RwLock::new(HashMap::new()),
            lists: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            ledger: Mutex::new(Ledger {
                events: Vec::new(),
                counted_once: HashSet::new(),
            }),
            deferred: Mutex::new(HashMap::new()),
            provider_refs: RwLock::new(HashMap::new()),
            email_index: RwLock::new(HashMap::new()),
            phone_index: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Campaigns
    // =========================================================================

    pub fn insert_campaign(&self, campaign: Campaign) {
        if let Some(ref provider_ref) = campaign.provider_campaign_ref {
            self.register_provider_ref(provider_ref, campaign.id, campaign.channel);
        }
        self.campaigns
            .write()
            .expect("campaign lock poisoned")
            .insert(campaign.id, campaign);
    }

    pub fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.campaigns
            .read()
            .expect("campaign lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn campaigns_matching(
        &self,
        f: impl Fn(&Campaign) -> bool,
    ) -> Vec<Campaign> {
        self.campaigns
            .read()
            .expect("campaign lock poisoned")
            .values()
            .filter(|c| f(c))
            .cloned()
            .collect()
    }

    /// Mutate one campaign under the write lock. The closure's guard checks
    /// run atomically with the mutation, which is what makes status
    /// transitions exactly-once under concurrent batch completions.
    pub fn try_update_campaign<T>(
        &self,
        id: CampaignId,
        f: impl FnOnce(&mut Campaign) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut campaigns = self.campaigns.write().expect("campaign lock poisoned");
        let campaign = campaigns
            .get_mut(&id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        f(campaign)
    }

    pub fn remove_campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.campaigns
            .write()
            .expect("campaign lock poisoned")
            .remove(&id)
    }

    // =========================================================================
    // Contacts and lists
    // =========================================================================

    pub fn insert_contact(&self, contact: Contact) {
        if let Some(ref email) = contact.email {
            self.email_index
                .write()
                .expect("email index lock poisoned")
                .insert(email.trim().to_lowercase(), contact.id);
        }
        if let Some(ref phone) = contact.phone {
            self.phone_index
                .write()
                .expect("phone index lock poisoned")
                .insert(digits_of(phone), contact.id);
        }
        self.contacts
            .write()
            .expect("contact lock poisoned")
            .insert(contact.id, contact);
    }

    pub fn contact(&self, id: ContactId) -> Option<Contact> {
        self.contacts
            .read()
            .expect("contact lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn try_update_contact<T>(
        &self,
        id: ContactId,
        f: impl FnOnce(&mut Contact) -> T,
    ) -> Result<T, EngineError> {
        let mut contacts = self.contacts.write().expect("contact lock poisoned");
        let contact = contacts
            .get_mut(&id)
            .ok_or(EngineError::ContactNotFound(id))?;
        Ok(f(contact))
    }

    pub fn contact_by_email(&self, email: &str) -> Option<ContactId> {
        self.email_index
            .read()
            .expect("email index lock poisoned")
            .get(&email.trim().to_lowercase())
            .copied()
    }

    /// Phone lookup ignores formatting; both sides are reduced to digits.
    pub fn contact_by_phone(&self, phone: &str) -> Option<ContactId> {
        self.phone_index
            .read()
            .expect("phone index lock poisoned")
            .get(&digits_of(phone))
            .copied()
    }

    pub fn insert_list(&self, list: List) {
        self.lists
            .write()
            .expect("list lock poisoned")
            .insert(list.id, list);
    }

    pub fn add_to_list(&self, list_id: ListId, contact_id: ContactId) {
        self.memberships
            .write()
            .expect("membership lock poisoned")
            .entry(list_id)
            .or_default()
            .insert(contact_id);
    }

    pub fn list_members(&self, list_id: ListId) -> HashSet<ContactId> {
        self.memberships
            .read()
            .expect("membership lock poisoned")
            .get(&list_id)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // Providers
    // =========================================================================

    pub fn insert_provider(&self, provider: Provider) {
        self.providers
            .write()
            .expect("provider lock poisoned")
            .insert(provider.id, provider);
    }

    pub fn provider(&self, id: ProviderId) -> Option<Provider> {
        self.providers
            .read()
            .expect("provider lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn register_provider_ref(
        &self,
        provider_ref: &str,
        campaign_id: CampaignId,
        channel: Channel,
    ) {
        self.provider_refs
            .write()
            .expect("provider ref lock poisoned")
            .insert(provider_ref.to_string(), (campaign_id, channel));
    }

    pub fn campaign_for_provider_ref(&self, provider_ref: &str) -> Option<(CampaignId, Channel)> {
        self.provider_refs
            .read()
            .expect("provider ref lock poisoned")
            .get(provider_ref)
            .copied()
    }

    // =========================================================================
    // Event ledger
    // =========================================================================

    /// Append an event to the ledger and fold it into its campaign's
    /// cached counters, all in one critical section.
    ///
    /// For counted-once types the uniqueness check and the insert happen
    /// under one lock, so concurrent duplicate deliveries cannot both
    /// record. The campaign write lock is taken while the ledger lock is
    /// still held (ordering note at the top of this file), so the counter
    /// write of one event can never be overtaken by another's: for
    /// repeatable types the distinct-count handed to `update` is exact at
    /// the moment the counters change. Counted-once events without a
    /// resolved contact are appended but cannot be deduplicated; `update`
    /// decides whether to count them. When the campaign is unknown the
    /// event is still kept for audit and an error is returned.
    pub fn record_event_with(
        &self,
        event: CampaignEvent,
        update: impl FnOnce(&mut Campaign, Option<u64>),
    ) -> Result<RecordOutcome, EngineError> {
        let mut ledger = self.ledger.lock().expect("ledger lock poisoned");

        if event.event_type.is_counted_once() {
            if let Some(contact_id) = event.contact_id {
                let key = (event.campaign_id, contact_id, event.event_type);
                if !ledger.counted_once.insert(key) {
                    debug!(
                        campaign_id = %event.campaign_id,
                        contact_id = %contact_id,
                        event_type = ?event.event_type,
                        "ledger_duplicate_ignored"
                    );
                    return Ok(RecordOutcome::Duplicate);
                }
            }
        }

        let campaign_id = event.campaign_id;
        let event_type = event.event_type;
        let counted_once = event_type.is_counted_once();
        ledger.events.push(event);
        let unique_contacts = if counted_once {
            None
        } else {
            Some(distinct_contacts_locked(
                &ledger.events,
                campaign_id,
                &[event_type],
            ))
        };

        let mut campaigns = self.campaigns.write().expect("campaign lock poisoned");
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(EngineError::CampaignNotFound(campaign_id))?;
        update(campaign, unique_contacts);
        Ok(RecordOutcome::Recorded { unique_contacts })
    }

    /// Count distinct contacts with at least one event of the given types.
    pub fn distinct_contacts(&self, campaign_id: CampaignId, types: &[EventType]) -> u64 {
        let ledger = self.ledger.lock().expect("ledger lock poisoned");
        distinct_contacts_locked(&ledger.events, campaign_id, types)
    }

    /// Snapshot of all ledger rows for one campaign.
    pub fn events_for(&self, campaign_id: CampaignId) -> Vec<CampaignEvent> {
        self.ledger
            .lock()
            .expect("ledger lock poisoned")
            .events
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    // =========================================================================
    // Deferred recipients
    // =========================================================================

    pub fn push_deferred(&self, campaign_id: CampaignId, contacts: Vec<ContactId>) {
        if contacts.is_empty() {
            return;
        }
        self.deferred
            .lock()
            .expect("deferred lock poisoned")
            .entry(campaign_id)
            .or_default()
            .extend(contacts);
    }

    /// Drain the deferral queue for a campaign.
    pub fn take_deferred(&self, campaign_id: CampaignId) -> Vec<ContactId> {
        self.deferred
            .lock()
            .expect("deferred lock poisoned")
            .remove(&campaign_id)
            .unwrap_or_default()
    }

    pub fn deferred_count(&self, campaign_id: CampaignId) -> usize {
        self.deferred
            .lock()
            .expect("deferred lock poisoned")
            .get(&campaign_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn distinct_contacts_locked(
    events: &[CampaignEvent],
    campaign_id: CampaignId,
    types: &[EventType],
) -> u64 {
    let mut seen: HashSet<ContactId> = HashSet::new();
    for event in events {
        if event.campaign_id == campaign_id && types.contains(&event.event_type) {
            if let Some(contact_id) = event.contact_id {
                seen.insert(contact_id);
            }
        }
    }
    seen.len() as u64
}

fn digits_of(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}
