//! Channel send adapter.
//!
//! Performs exactly one transport attempt per recipient and returns a
//! normalized outcome. Personalization (merge tags, opt-out injection,
//! phone normalization) happens here; retry policy belongs to the
//! enqueuing layer, never to this module.

pub mod email;
pub mod segment;
pub mod sms;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::model::{Campaign, CampaignContent, Contact, Provider};

pub use segment::{calculate_segments, SegmentInfo, SmsEncoding};

/// Result of a raw transport call, as reported by the external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResult {
    Accepted {
        provider_message_id: Option<String>,
    },
    Rejected {
        reason: String,
    },
    /// Credential-level failure: nothing can be sent through this provider
    AuthFailed {
        reason: String,
    },
}

/// Channel transport provided by an external collaborator. Token
/// acquisition and protocol details are opaque to the engine.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send_email(
        &self,
        provider: &Provider,
        to: &str,
        subject: &str,
        html: &str,
        from_name: &str,
        from_address: &str,
    ) -> TransportResult;

    async fn send_sms(
        &self,
        provider: &Provider,
        to_e164: &str,
        body: &str,
        sender_name: &str,
    ) -> TransportResult;
}

/// Normalized outcome of one adapter attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { provider_message_id: Option<String> },
    Failed { reason: String },
    AuthFailed { reason: String },
}

/// Perform one send attempt for a recipient of a campaign.
///
/// SMS recipients whose phone cannot be normalized into E.164 fail
/// locally; no transport call is made for them.
pub async fn send_to(
    transport: &dyn ChannelTransport,
    config: &Config,
    campaign: &Campaign,
    provider: &Provider,
    contact: &Contact,
) -> SendOutcome {
    match &campaign.content {
        CampaignContent::Email {
            subject,
            html,
            from_name,
            from_address,
        } => {
            email::send_email(
                transport,
                provider,
                contact,
                subject,
                html,
                from_name,
                from_address,
            )
            .await
        }
        CampaignContent::Sms {
            template,
            sender_name,
        } => {
            let raw_phone = contact.phone.as_deref().unwrap_or("");
            let to = match sms::normalize_e164(raw_phone, &config.default_country_code) {
                Ok(phone) => phone,
                Err(e) => {
                    info!(
                        contact_id = %contact.id,
                        phone = %raw_phone,
                        "sms_invalid_phone_rejected_locally"
                    );
                    return SendOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            };

            let body = sms::render_body(template, contact, &campaign.settings);

            match transport.send_sms(provider, &to, &body, sender_name).await {
                TransportResult::Accepted {
                    provider_message_id,
                } => {
                    info!(
                        contact_id = %contact.id,
                        provider_message_id = ?provider_message_id,
                        segments = calculate_segments(&body).segments,
                        "sms_send_accepted"
                    );
                    SendOutcome::Sent {
                        provider_message_id,
                    }
                }
                TransportResult::Rejected { reason } => SendOutcome::Failed { reason },
                TransportResult::AuthFailed { reason } => SendOutcome::AuthFailed { reason },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CampaignSettings;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Transport double that records calls and replies with a fixed result.
    struct RecordingTransport {
        calls: Mutex<Vec<(String, String)>>,
        result: TransportResult,
    }

    impl RecordingTransport {
        fn accepting() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                result: TransportResult::Accepted {
                    provider_message_id: Some("prov-1".to_string()),
                },
            }
        }
    }

    #[async_trait]
    impl ChannelTransport for RecordingTransport {
        async fn send_email(
            &self,
            _provider: &Provider,
            to: &str,
            subject: &str,
            _html: &str,
            _from_name: &str,
            _from_address: &str,
        ) -> TransportResult {
            self.calls
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            self.result.clone()
        }

        async fn send_sms(
            &self,
            _provider: &Provider,
            to_e164: &str,
            body: &str,
            _sender_name: &str,
        ) -> TransportResult {
            self.calls
                .lock()
                .unwrap()
                .push((to_e164.to_string(), body.to_string()));
            self.result.clone()
        }
    }

    fn sms_campaign(template: &str) -> (Campaign, Provider) {
        let provider = Provider::new("gateway", 1000, 100);
        let mut campaign = Campaign::new(
            Uuid::new_v4(),
            provider.id,
            CampaignContent::Sms {
                template: template.to_string(),
                sender_name: "Acme".to_string(),
            },
        );
        campaign.settings = CampaignSettings::default();
        (campaign, provider)
    }

    #[tokio::test]
    async fn test_sms_send_personalizes_and_normalizes() {
        let transport = RecordingTransport::accepting();
        let config = Config::for_tests();
        let (campaign, provider) = sms_campaign("Oi {{first_name}}!");

        let mut contact = Contact::new(None, Some("11 99999-0000".to_string()));
        contact.first_name = Some("Ana".to_string());

        let outcome = send_to(&transport, &config, &campaign, &provider, &contact).await;

        assert_eq!(
            outcome,
            SendOutcome::Sent {
                provider_message_id: Some("prov-1".to_string())
            }
        );
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "+5511999990000");
        assert_eq!(calls[0].1, "Oi Ana!\nResponda SAIR para cancelar");
    }

    #[tokio::test]
    async fn test_sms_invalid_phone_fails_without_transport_call() {
        let transport = RecordingTransport::accepting();
        let config = Config::for_tests();
        let (campaign, provider) = sms_campaign("Oi!");

        let contact = Contact::new(None, Some("123".to_string()));
        let outcome = send_to(&transport, &config, &campaign, &provider, &contact).await;

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_email_send_uses_prerendered_content() {
        let transport = RecordingTransport::accepting();
        let config = Config::for_tests();
        let provider = Provider::new("smtp", 1000, 100);
        let campaign = Campaign::new(
            Uuid::new_v4(),
            provider.id,
            CampaignContent::Email {
                subject: "Novidades".to_string(),
                html: "<p>Oi</p>".to_string(),
                from_name: "Acme".to_string(),
                from_address: "news@acme.com".to_string(),
            },
        );
        let contact = Contact::new(Some("ana@example.com".to_string()), None);

        let outcome = send_to(&transport, &config, &campaign, &provider, &contact).await;

        assert!(matches!(outcome, SendOutcome::Sent { .. }));
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0], ("ana@example.com".to_string(), "Novidades".to_string()));
    }

    #[tokio::test]
    async fn test_auth_failure_propagates() {
        let transport = RecordingTransport {
            calls: Mutex::new(Vec::new()),
            result: TransportResult::AuthFailed {
                reason: "invalid token".to_string(),
            },
        };
        let config = Config::for_tests();
        let (campaign, provider) = sms_campaign("Oi!");
        let contact = Contact::new(None, Some("+5511999990000".to_string()));

        let outcome = send_to(&transport, &config, &campaign, &provider, &contact).await;
        assert!(matches!(outcome, SendOutcome::AuthFailed { .. }));
    }
}
