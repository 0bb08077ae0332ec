//! Core data model: campaigns, contacts, lists and the event ledger.
//!
//! Campaign and `CampaignEvent` rows are created by this engine; `Contact`
//! rows are authored elsewhere (list import, manual entry) and only their
//! suppression state is mutated here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CampaignId = Uuid;
pub type ContactId = Uuid;
pub type ListId = Uuid;
pub type ProviderId = Uuid;
pub type TenantId = Uuid;

/// Delivery channel of a campaign or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

/// Campaign lifecycle status.
///
/// Transitions are guarded centrally by the dispatcher's transition table,
/// never by ad-hoc status checks at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Sent,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled | Self::Failed)
    }
}

/// Contact suppression status. Email-scoped; SMS opt-out is a separate flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Active,
    Unsubscribed,
    Bounced,
    Complained,
}

/// Canonical, vendor-independent delivery-status event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sent,
    Delivered,
    Bounced,
    Opened,
    Clicked,
    Unsubscribed,
    Complained,
    Failed,
    Optout,
}

impl EventType {
    /// Counted-once types admit at most one ledger row per
    /// (campaign, contact, type). `Opened`/`Clicked` repeat freely and
    /// unique-contact counts are derived instead.
    pub fn is_counted_once(self) -> bool {
        !matches!(self, Self::Opened | Self::Clicked)
    }
}

/// Hard bounces suppress the contact permanently; soft bounces only count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceKind {
    Hard,
    Soft,
}

/// Composed campaign content, opaque to the engine beyond rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum CampaignContent {
    Email {
        subject: String,
        /// Pre-rendered HTML body
        html: String,
        from_name: String,
        from_address: String,
    },
    Sms {
        /// Message template with merge tags
        template: String,
        sender_name: String,
    },
}

impl CampaignContent {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Email { subject, html, .. } => subject.trim().is_empty() || html.trim().is_empty(),
            Self::Sms { template, .. } => template.trim().is_empty(),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Email { .. } => Channel::Email,
            Self::Sms { .. } => Channel::Sms,
        }
    }
}

/// Per-campaign send settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSettings {
    /// Optional override for the per-batch delay, in seconds
    pub send_speed_secs: Option<u64>,
    /// Opt-out disclaimer appended to SMS bodies
    pub optout_text: Option<String>,
    /// Suppress the opt-out disclaimer entirely
    pub skip_optout_text: bool,
    pub track_opens: bool,
    pub track_clicks: bool,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            send_speed_secs: None,
            optout_text: None,
            skip_optout_text: false,
            track_opens: true,
            track_clicks: true,
        }
    }
}

/// Cached aggregate counters, maintained by the reconciler and fully
/// recomputable from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_recipients: u64,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed_or_bounced: u64,
    pub total_opened: u64,
    pub total_clicked: u64,
    pub total_unsubscribed: u64,
    pub total_complained: u64,
    pub unique_opens: u64,
    pub unique_clicks: u64,
}

/// A single email or SMS campaign, owned by one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub status: CampaignStatus,
    pub provider_id: ProviderId,
    /// Provider-assigned campaign reference, used to correlate webhooks
    pub provider_campaign_ref: Option<String>,
    pub content: CampaignContent,
    pub include_list_ids: Vec<ListId>,
    pub exclude_list_ids: Vec<ListId>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: CampaignStats,
    pub settings: CampaignSettings,
    /// Consecutive batches that failed provider authentication
    pub auth_failures: u32,
}

impl Campaign {
    pub fn new(tenant_id: TenantId, provider_id: ProviderId, content: CampaignContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            channel: content.channel(),
            status: CampaignStatus::Draft,
            provider_id,
            provider_campaign_ref: None,
            content,
            include_list_ids: Vec::new(),
            exclude_list_ids: Vec::new(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            stats: CampaignStats::default(),
            settings: CampaignSettings::default(),
            auth_failures: 0,
        }
    }

    /// Copy a campaign into a fresh draft with cleared counters and timestamps.
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: CampaignStatus::Draft,
            provider_campaign_ref: None,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            stats: CampaignStats::default(),
            auth_failures: 0,
            ..self.clone()
        }
    }
}

/// A contact shared across all campaigns of a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub status: ContactStatus,
    /// SMS-scoped opt-out; independent of the email-scoped `status`
    pub sms_optout: bool,
    pub suppressed_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn new(email: Option<String>, phone: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            phone,
            first_name: None,
            last_name: None,
            company: None,
            status: ContactStatus::Active,
            sms_optout: false,
            suppressed_at: None,
        }
    }
}

/// A named list of contacts; attached to campaigns as include or exclude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    pub name: String,
}

/// A provider credential with send-rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub daily_limit: u64,
    pub hourly_limit: u64,
}

impl Provider {
    pub fn new(name: impl Into<String>, daily_limit: u64, hourly_limit: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            daily_limit,
            hourly_limit,
        }
    }
}

/// One row of the append-only event ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    /// May be unresolved at ingestion time
    pub contact_id: Option<ContactId>,
    pub event_type: EventType,
    pub bounce_kind: Option<BounceKind>,
    /// Raw provider metadata as received
    pub raw: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl CampaignEvent {
    pub fn new(campaign_id: CampaignId, contact_id: Option<ContactId>, event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            event_type,
            bounce_kind: None,
            raw: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_bounce_kind(mut self, kind: BounceKind) -> Self {
        self.bounce_kind = Some(kind);
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }
}
