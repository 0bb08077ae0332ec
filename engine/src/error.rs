//! Engine error types.
//!
//! These errors surface only at the control-operation boundary (send,
//! schedule, pause, cancel, ...). Everything inside batch execution is
//! handled asynchronously and reflected through campaign status and
//! counters, never through a synchronous error.

use thiserror::Error;

use crate::model::{CampaignId, CampaignStatus, ContactId};

/// Errors returned by campaign control operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),

    #[error("contact {0} not found")]
    ContactNotFound(ContactId),

    #[error("invalid campaign status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("campaign content is empty")]
    EmptyContent,

    #[error("campaign has no valid provider configured")]
    ProviderMissing,

    #[error("campaign has no eligible recipients")]
    NoEligibleRecipients,

    #[error("campaign cannot be deleted while {0:?}")]
    DeleteForbidden(CampaignStatus),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}
