//! Open/click tracking tokens.
//!
//! A token names a (campaign, contact) pair and is signed so that the
//! public tracking endpoints cannot be used to fabricate events for
//! arbitrary ids. Format: `<campaign>.<contact>.<hmac-sha256 hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::model::{CampaignId, ContactId};

use super::signature::constant_time_compare;

type HmacSha256 = Hmac<Sha256>;

/// Build a signed tracking token for a recipient of a campaign.
pub fn encode_token(signing_key: &str, campaign_id: CampaignId, contact_id: ContactId) -> String {
    let payload = format!("{}.{}", campaign_id.simple(), contact_id.simple());
    format!("{}.{}", payload, sign(signing_key, &payload))
}

/// Decode and verify a tracking token.
///
/// Returns `None` for any malformed or forged token; callers degrade
/// gracefully rather than erroring.
pub fn decode_token(signing_key: &str, token: &str) -> Option<(CampaignId, ContactId)> {
    let mut parts = token.splitn(3, '.');
    let campaign_part = parts.next()?;
    let contact_part = parts.next()?;
    let signature = parts.next()?;

    let payload = format!("{}.{}", campaign_part, contact_part);
    if signature.is_empty() || !constant_time_compare(&sign(signing_key, &payload), signature) {
        return None;
    }

    let campaign_id = Uuid::parse_str(campaign_part).ok()?;
    let contact_id = Uuid::parse_str(contact_part).ok()?;
    Some((campaign_id, contact_id))
}

fn sign(signing_key: &str, payload: &str) -> String {
    // HMAC accepts keys of any length; construction cannot fail for &str keys.
    let mut mac = match HmacSha256::new_from_slice(signing_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
