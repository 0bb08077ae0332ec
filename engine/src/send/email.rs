//! Email send path.
//!
//! Email content arrives pre-rendered; the adapter only validates the
//! destination address and performs the transport call.

use tracing::info;

use crate::model::{Contact, Provider};

use super::{ChannelTransport, SendOutcome, TransportResult};

/// Perform one email transport attempt for a contact.
pub async fn send_email(
    transport: &dyn ChannelTransport,
    provider: &Provider,
    contact: &Contact,
    subject: &str,
    html: &str,
    from_name: &str,
    from_address: &str,
) -> SendOutcome {
    let Some(to) = contact.email.as_deref().filter(|e| !e.trim().is_empty()) else {
        return SendOutcome::Failed {
            reason: "contact has no email address".to_string(),
        };
    };

    let result = transport
        .send_email(provider, to, subject, html, from_name, from_address)
        .await;

    match result {
        TransportResult::Accepted {
            provider_message_id,
        } => {
            info!(
                contact_id = %contact.id,
                provider_message_id = ?provider_message_id,
                "email_send_accepted"
            );
            SendOutcome::Sent {
                provider_message_id,
            }
        }
        TransportResult::Rejected { reason } => SendOutcome::Failed { reason },
        TransportResult::AuthFailed { reason } => SendOutcome::AuthFailed { reason },
    }
}
