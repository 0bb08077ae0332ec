//! Campaign Engine - multi-channel campaign delivery and event reconciliation.
//!
//! This library turns a composed email or SMS campaign into batches of
//! provider sends, enforces per-provider quotas, ingests asynchronous
//! delivery-status webhooks, and reconciles them into authoritative
//! per-campaign statistics and per-contact suppression state.
//!
//! ## Architecture
//!
//! ```text
//! Dispatcher → Resolver → Quota Guard → Send Adapter → sent/failed events
//!                                                          ↓
//! Provider webhooks → Classifier → Deduplicator → Stats Reconciler
//!                                                          ↓
//!                                              Suppression Manager
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod quota;
pub mod reconcile;
pub mod resolve;
pub mod send;
pub mod store;
pub mod suppress;
pub mod web;
pub mod webhook;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{CostEstimate, Dispatcher};
pub use error::EngineError;
pub use model::{
    Campaign, CampaignEvent, CampaignStats, CampaignStatus, Channel, Contact, ContactStatus,
    EventType, Provider,
};
pub use quota::QuotaGuard;
pub use reconcile::Reconciler;
pub use send::{calculate_segments, ChannelTransport, SegmentInfo, TransportResult};
pub use store::MemoryStore;
pub use suppress::Suppressor;
pub use web::AppState;
pub use webhook::{IngestSummary, WebhookProcessor};
