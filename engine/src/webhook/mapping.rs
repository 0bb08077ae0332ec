//! Vendor vocabulary mapping.
//!
//! Providers disagree on event naming; everything is mapped into the
//! canonical `EventType` set here. An opt-out keyword in an inbound
//! message body wins over whatever status the payload declares.

use crate::model::{BounceKind, EventType};

/// Keywords an SMS recipient can reply with to opt out.
pub const OPTOUT_KEYWORDS: &[&str] = &["SAIR", "STOP", "PARAR", "CANCELAR"];

/// Canonical interpretation of one vendor event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorMapping {
    Event {
        event_type: EventType,
        bounce_kind: Option<BounceKind>,
    },
    /// Informational; never touches counters, may clear an unsubscribe
    Subscribe,
}

impl VendorMapping {
    fn event(event_type: EventType) -> Self {
        Self::Event {
            event_type,
            bounce_kind: None,
        }
    }

    fn bounce(kind: BounceKind) -> Self {
        Self::Event {
            event_type: EventType::Bounced,
            bounce_kind: Some(kind),
        }
    }
}

/// Map a vendor event name to the canonical vocabulary.
///
/// Returns `None` for anything unrecognized; the caller logs and drops.
pub fn map_vendor_event(name: &str) -> Option<VendorMapping> {
    let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
    let mapping = match normalized.as_str() {
        "sent" | "send" | "accepted" | "enviado" => VendorMapping::event(EventType::Sent),
        "delivered" | "delivery" | "entregue" => VendorMapping::event(EventType::Delivered),
        // Bare "bounced" carries no severity; the caller refines it from a
        // `severity` field, defaulting to hard.
        "bounced" | "bounce" => VendorMapping::event(EventType::Bounced),
        "hard_bounce" | "permanent_error" | "permanent_fail" => {
            VendorMapping::bounce(BounceKind::Hard)
        }
        "soft_bounce" | "temporary_error" | "temporary_fail" => {
            VendorMapping::bounce(BounceKind::Soft)
        }
        "opened" | "open" | "read" => VendorMapping::event(EventType::Opened),
        "clicked" | "click" | "redirect" => VendorMapping::event(EventType::Clicked),
        "unsubscribed" | "unsubscribe" => VendorMapping::event(EventType::Unsubscribed),
        "complained" | "complaint" | "spam" | "spam_report" | "abuse" => {
            VendorMapping::event(EventType::Complained)
        }
        "failed" | "failure" | "error" | "rejected" | "dropped" | "undelivered" => {
            VendorMapping::event(EventType::Failed)
        }
        "optout" | "opt_out" => VendorMapping::event(EventType::Optout),
        "subscribe" | "subscribed" | "resubscribe" | "resubscribed" => VendorMapping::Subscribe,
        _ => return None,
    };
    Some(mapping)
}

/// True when an inbound message body is exactly an opt-out keyword.
pub fn is_optout_keyword(body: &str) -> bool {
    let trimmed = body.trim().to_uppercase();
    OPTOUT_KEYWORDS.contains(&trimmed.as_str())
}

/// Refine a bounce kind using a vendor `severity` field, when present.
pub fn bounce_kind_from_severity(severity: Option<&str>) -> Option<BounceKind> {
    match severity.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("permanent") => Some(BounceKind::Hard),
        Some("temporary") => Some(BounceKind::Soft),
        _ => None,
    }
}
