//! Payload explosion and channel classification.
//!
//! Provider payloads are duck-typed: a single event object, a bare array,
//! or `{"events": [...]}`. Nothing here assumes field presence; every
//! lookup degrades to the next rule.

use serde_json::Value;
use uuid::Uuid;

use crate::model::{CampaignId, Channel};
use crate::store::MemoryStore;

/// Fields that may carry the vendor event name, in lookup order.
const EVENT_NAME_FIELDS: &[&str] = &["event", "event_type", "status", "type"];

/// Fields that may carry an inbound message body.
const BODY_FIELDS: &[&str] = &["body", "message", "text"];

/// Fields that may carry the recipient phone number.
const PHONE_FIELDS: &[&str] = &["phone", "msisdn", "from", "to"];

/// Fields that may carry the provider-side campaign reference.
const CAMPAIGN_FIELDS: &[&str] = &["campaign_id", "campaign", "campaign_ref"];

/// Split a webhook body into individual event objects.
pub fn explode(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("events") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![payload.clone()],
        },
        _ => Vec::new(),
    }
}

/// Classify one event as email or SMS.
///
/// Precedence: explicit `channel` field; a phone-ish recipient without any
/// email address; the channel of a resolvable campaign reference; email as
/// the default. The campaign reference outranks a bare email field, so an
/// SMS event that happens to carry the contact's email address still lands
/// on the SMS side.
pub fn classify_channel(event: &Value, store: &MemoryStore) -> Channel {
    if let Some(channel) = event.get("channel").and_then(Value::as_str) {
        match channel.trim().to_lowercase().as_str() {
            "sms" => return Channel::Sms,
            "email" => return Channel::Email,
            _ => {}
        }
    }

    if email_of(event).is_none() && phone_of(event).is_some() {
        return Channel::Sms;
    }

    if let Some((_, channel)) = resolve_campaign(event, store) {
        return channel;
    }

    Channel::Email
}

/// First string value among the event-name fields.
pub fn event_name(event: &Value) -> Option<&str> {
    first_str(event, EVENT_NAME_FIELDS)
}

/// Inbound message body, if the payload carries one.
pub fn message_body(event: &Value) -> Option<&str> {
    first_str(event, BODY_FIELDS)
}

/// Recipient email address. A `recipient` field counts only when it looks
/// like an address; SMS providers reuse the same field for phone numbers.
pub fn email_of(event: &Value) -> Option<&str> {
    if let Some(email) = event.get("email").and_then(Value::as_str) {
        if !email.trim().is_empty() {
            return Some(email);
        }
    }
    event
        .get("recipient")
        .and_then(Value::as_str)
        .filter(|r| r.contains('@'))
}

/// Recipient phone number in any of the common vendor fields.
pub fn phone_of(event: &Value) -> Option<&str> {
    for field in PHONE_FIELDS {
        if let Some(phone) = event.get(*field).and_then(Value::as_str) {
            if phone.chars().filter(|c| c.is_ascii_digit()).count() >= 8 {
                return Some(phone);
            }
        }
    }
    event
        .get("recipient")
        .and_then(Value::as_str)
        .filter(|r| !r.contains('@') && r.chars().any(|c| c.is_ascii_digit()))
}

/// Resolve the campaign an event belongs to.
///
/// The reference may be this engine's own campaign id or a
/// provider-assigned one registered at send time.
pub fn resolve_campaign(event: &Value, store: &MemoryStore) -> Option<(CampaignId, Channel)> {
    let reference = first_str(event, CAMPAIGN_FIELDS)?;

    if let Ok(id) = Uuid::parse_str(reference.trim()) {
        if let Some(campaign) = store.campaign(id) {
            return Some((campaign.id, campaign.channel));
        }
    }
    store.campaign_for_provider_ref(reference.trim())
}

fn first_str<'a>(event: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| event.get(*f).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}
