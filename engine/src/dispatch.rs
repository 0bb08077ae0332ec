//! Campaign dispatcher: lifecycle state machine, batch partitioning and
//! delayed batch scheduling.
//!
//! The state machine is a single transition table; every guard lives here
//! rather than being re-derived at call sites. Batches are independent
//! units of work spawned as tokio tasks with an increasing delay offset,
//! which spreads provider load and complements the quota guard.
//!
//! Pausing or cancelling stops future batch sends but never aborts an
//! in-flight attempt: events from such attempts represent real provider
//! sends and are still recorded, without flipping a paused or terminal
//! campaign back to `sending`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::model::{Campaign, CampaignEvent, CampaignId, CampaignStatus, ContactId, EventType};
use crate::quota::QuotaGuard;
use crate::reconcile::Reconciler;
use crate::resolve::resolve_recipients;
use crate::send::{self, calculate_segments, ChannelTransport, SegmentInfo, SendOutcome};
use crate::store::MemoryStore;

/// Result of a cost estimation, computed without any transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostEstimate {
    pub recipients: u64,
    /// SMS only: segmentation of one rendered message
    pub segments_per_message: Option<SegmentInfo>,
    /// SMS only: recipients × segments per message
    pub total_segments: Option<u64>,
}

/// Legal campaign status transitions.
fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
    use CampaignStatus::*;
    matches!(
        (from, to),
        (Draft, Scheduled)
            | (Scheduled, Draft)
            | (Draft, Sending)
            | (Scheduled, Sending)
            | (Sending, Paused)
            | (Paused, Sending)
            | (Sending, Sent)
            | (Sending, Failed)
            | (Draft, Cancelled)
            | (Scheduled, Cancelled)
            | (Sending, Cancelled)
            | (Paused, Cancelled)
    )
}

/// Campaign dispatcher shared across the web surface and the scheduler.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<MemoryStore>,
    quota: Arc<QuotaGuard>,
    transport: Arc<dyn ChannelTransport>,
    reconciler: Reconciler,
    config: Arc<Config>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<MemoryStore>,
        quota: Arc<QuotaGuard>,
        transport: Arc<dyn ChannelTransport>,
        config: Arc<Config>,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store));
        Self {
            store,
            quota,
            transport,
            reconciler,
            config,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// Start sending a campaign.
    ///
    /// Allowed only from `draft`/`scheduled`; requires non-empty content,
    /// a valid provider and at least one resolved recipient. Partitions
    /// recipients into batches and spawns one delayed unit of work each.
    pub fn send(&self, id: CampaignId) -> Result<(), EngineError> {
        let campaign = self
            .store
            .campaign(id)
            .ok_or(EngineError::CampaignNotFound(id))?;

        if campaign.content.is_empty() {
            return Err(EngineError::EmptyContent);
        }
        if self.store.provider(campaign.provider_id).is_none() {
            return Err(EngineError::ProviderMissing);
        }

        let recipients =
            resolve_recipients(&self.store, &campaign, &self.config.default_country_code);
        if recipients.is_empty() {
            return Err(EngineError::NoEligibleRecipients);
        }

        let total = recipients.len();
        self.store.try_update_campaign(id, |c| {
            if !matches!(c.status, CampaignStatus::Draft | CampaignStatus::Scheduled) {
                return Err(EngineError::InvalidTransition {
                    from: c.status,
                    to: CampaignStatus::Sending,
                });
            }
            c.status = CampaignStatus::Sending;
            c.started_at = Some(Utc::now());
            c.stats.total_recipients = total as u64;
            Ok(())
        })?;

        info!(
            campaign_id = %id,
            channel = ?campaign.channel,
            recipients = total,
            "campaign_send_started"
        );

        self.spawn_batches(id, recipients, self.batch_delay_secs(&campaign));
        Ok(())
    }

    /// Schedule a campaign for a later send; the scheduler loop promotes it.
    pub fn schedule(&self, id: CampaignId, at: DateTime<Utc>) -> Result<(), EngineError> {
        self.store.try_update_campaign(id, |c| {
            if c.status != CampaignStatus::Scheduled {
                guard(c.status, CampaignStatus::Scheduled)?;
            }
            c.status = CampaignStatus::Scheduled;
            c.scheduled_at = Some(at);
            Ok(())
        })?;
        info!(campaign_id = %id, scheduled_at = %at, "campaign_scheduled");
        Ok(())
    }

    /// Pause a sending campaign. Batches that wake while paused park their
    /// recipients in the deferral queue.
    pub fn pause(&self, id: CampaignId) -> Result<(), EngineError> {
        self.transition(id, CampaignStatus::Paused)?;
        info!(campaign_id = %id, "campaign_paused");
        Ok(())
    }

    /// Resume a paused campaign and re-dispatch its deferred recipients.
    pub fn resume(&self, id: CampaignId) -> Result<(), EngineError> {
        self.transition(id, CampaignStatus::Sending)?;
        let flushed = self.flush_deferred(id)?;
        info!(campaign_id = %id, deferred_resumed = flushed, "campaign_resumed");
        Ok(())
    }

    /// Cancel a campaign from any non-terminal state.
    pub fn cancel(&self, id: CampaignId) -> Result<(), EngineError> {
        self.transition(id, CampaignStatus::Cancelled)?;
        info!(campaign_id = %id, "campaign_cancelled");
        Ok(())
    }

    /// Delete a campaign; allowed only from `draft`.
    pub fn delete(&self, id: CampaignId) -> Result<(), EngineError> {
        self.store.try_update_campaign(id, |c| {
            if c.status != CampaignStatus::Draft {
                return Err(EngineError::DeleteForbidden(c.status));
            }
            Ok(())
        })?;
        self.store.remove_campaign(id);
        info!(campaign_id = %id, "campaign_deleted");
        Ok(())
    }

    /// Copy a campaign into a fresh draft.
    pub fn duplicate(&self, id: CampaignId) -> Result<Campaign, EngineError> {
        let campaign = self
            .store
            .campaign(id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        let copy = campaign.duplicate();
        self.store.insert_campaign(copy.clone());
        info!(campaign_id = %id, copy_id = %copy.id, "campaign_duplicated");
        Ok(copy)
    }

    /// Estimate the cost of a campaign without sending anything.
    ///
    /// SMS segmentation is computed over the rendered template (merge tags
    /// blanked, opt-out disclaimer applied), so the estimate reflects what
    /// would actually be transmitted.
    pub fn estimate_cost(&self, id: CampaignId) -> Result<CostEstimate, EngineError> {
        let campaign = self
            .store
            .campaign(id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        let recipients =
            resolve_recipients(&self.store, &campaign, &self.config.default_country_code).len()
                as u64;

        let segments_per_message = match &campaign.content {
            crate::model::CampaignContent::Sms { template, .. } => {
                let blank = crate::model::Contact::new(None, None);
                let body = send::sms::render_body(template, &blank, &campaign.settings);
                Some(calculate_segments(&body))
            }
            crate::model::CampaignContent::Email { .. } => None,
        };

        Ok(CostEstimate {
            recipients,
            segments_per_message,
            total_segments: segments_per_message.map(|s| recipients * s.segments as u64),
        })
    }

    /// Re-dispatch recipients parked by quota exhaustion or a pause.
    pub fn flush_deferred(&self, id: CampaignId) -> Result<usize, EngineError> {
        let campaign = self
            .store
            .campaign(id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        let deferred = self.store.take_deferred(id);
        if deferred.is_empty() {
            return Ok(0);
        }
        let count = deferred.len();
        info!(campaign_id = %id, deferred = count, "deferred_redispatch");
        self.spawn_batches(id, deferred, self.batch_delay_secs(&campaign));
        Ok(count)
    }

    // =========================================================================
    // Scheduler loop
    // =========================================================================

    /// Background loop promoting due scheduled campaigns and re-driving
    /// deferred work. Runs until the task is dropped.
    pub async fn run_scheduler(self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scheduler_poll_secs.max(1)));
        info!(
            poll_secs = self.config.scheduler_poll_secs,
            "scheduler_started"
        );
        loop {
            interval.tick().await;
            let now = Utc::now();

            let due = self.store.campaigns_matching(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.scheduled_at.map(|at| at <= now).unwrap_or(false)
            });
            for campaign in due {
                info!(campaign_id = %campaign.id, "scheduled_campaign_due");
                if let Err(e) = self.send(campaign.id) {
                    warn!(campaign_id = %campaign.id, error = %e, "scheduled_send_failed");
                }
            }

            let sending = self
                .store
                .campaigns_matching(|c| c.status == CampaignStatus::Sending);
            for campaign in sending {
                if self.store.deferred_count(campaign.id) > 0 {
                    if let Err(e) = self.flush_deferred(campaign.id) {
                        warn!(campaign_id = %campaign.id, error = %e, "deferred_flush_failed");
                    }
                }
            }
        }
    }

    // =========================================================================
    // Batch execution
    // =========================================================================

    fn batch_delay_secs(&self, campaign: &Campaign) -> u64 {
        campaign
            .settings
            .send_speed_secs
            .unwrap_or(self.config.batch_delay_secs)
    }

    fn spawn_batches(&self, campaign_id: CampaignId, recipients: Vec<ContactId>, delay_secs: u64) {
        for (index, chunk) in recipients.chunks(self.config.batch_size.max(1)).enumerate() {
            let dispatcher = self.clone();
            let batch = chunk.to_vec();
            let delay = Duration::from_secs(delay_secs * index as u64);
            tokio::spawn(async move {
                dispatcher.run_batch(campaign_id, index, batch, delay).await;
            });
        }
    }

    async fn run_batch(
        self,
        campaign_id: CampaignId,
        batch_index: usize,
        recipients: Vec<ContactId>,
        delay: Duration,
    ) {
        if !delay.is_zero() {
            sleep(delay).await;
        }

        // Re-check status at wake: pause/cancel stops future batch sends.
        let Some(campaign) = self.store.campaign(campaign_id) else {
            warn!(campaign_id = %campaign_id, "batch_campaign_missing");
            return;
        };
        match campaign.status {
            CampaignStatus::Sending => {}
            CampaignStatus::Paused => {
                info!(
                    campaign_id = %campaign_id,
                    batch_index = batch_index,
                    "batch_deferred_paused"
                );
                self.store.push_deferred(campaign_id, recipients);
                return;
            }
            other => {
                info!(
                    campaign_id = %campaign_id,
                    batch_index = batch_index,
                    status = ?other,
                    "batch_abandoned"
                );
                return;
            }
        }

        let Some(provider) = self.store.provider(campaign.provider_id) else {
            error!(campaign_id = %campaign_id, "batch_provider_missing");
            return;
        };

        info!(
            campaign_id = %campaign_id,
            batch_index = batch_index,
            size = recipients.len(),
            "dispatch_batch_start"
        );

        let mut sent = 0usize;
        let mut failed = 0usize;
        let mut auth_failure: Option<String> = None;
        let total = recipients.len();

        for (pos, contact_id) in recipients.iter().enumerate() {
            // Status can change mid-batch.
            match self.store.campaign(campaign_id).map(|c| c.status) {
                Some(CampaignStatus::Sending) => {}
                Some(CampaignStatus::Paused) => {
                    self.store
                        .push_deferred(campaign_id, recipients[pos..].to_vec());
                    info!(campaign_id = %campaign_id, "batch_interrupted_paused");
                    return;
                }
                _ => {
                    info!(campaign_id = %campaign_id, "batch_interrupted_terminal");
                    return;
                }
            }

            let decision = self.quota.try_acquire(&provider, Utc::now());
            if !decision.is_allowed() {
                // Not an error: remaining recipients are deferred, never
                // recorded as failures.
                warn!(
                    campaign_id = %campaign_id,
                    provider_id = %provider.id,
                    decision = ?decision,
                    deferred = total - pos,
                    "quota_exhausted_deferring"
                );
                self.store
                    .push_deferred(campaign_id, recipients[pos..].to_vec());
                break;
            }

            let Some(contact) = self.store.contact(*contact_id) else {
                warn!(contact_id = %contact_id, "batch_contact_missing");
                continue;
            };

            let outcome =
                send::send_to(&*self.transport, &self.config, &campaign, &provider, &contact)
                    .await;

            match outcome {
                SendOutcome::Sent {
                    provider_message_id,
                } => {
                    sent += 1;
                    self.reconciler.apply(
                        CampaignEvent::new(campaign_id, Some(*contact_id), EventType::Sent)
                            .with_raw(serde_json::json!({
                                "provider_message_id": provider_message_id,
                            })),
                    );
                }
                SendOutcome::Failed { reason } => {
                    failed += 1;
                    self.reconciler.apply(
                        CampaignEvent::new(campaign_id, Some(*contact_id), EventType::Failed)
                            .with_raw(serde_json::json!({ "error": reason })),
                    );
                }
                SendOutcome::AuthFailed { reason } => {
                    // Fatal for the batch: nothing can be sent.
                    auth_failure = Some(reason);
                    self.store
                        .push_deferred(campaign_id, recipients[pos..].to_vec());
                    break;
                }
            }

            // Small jittered pause to avoid bursting the transport.
            let (min, max) = self.config.send_pause_ms;
            if max > 0 && pos + 1 < total {
                let pause_ms = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(min..=max)
                };
                sleep(Duration::from_millis(pause_ms)).await;
            }
        }

        if let Some(reason) = auth_failure {
            error!(
                campaign_id = %campaign_id,
                batch_index = batch_index,
                reason = %reason,
                "batch_auth_failed"
            );
            let threshold = self.config.auth_failure_threshold;
            let _ = self.store.try_update_campaign(campaign_id, |c| {
                c.auth_failures += 1;
                if c.auth_failures >= threshold && c.status == CampaignStatus::Sending {
                    c.status = CampaignStatus::Failed;
                    error!(
                        campaign_id = %c.id,
                        auth_failures = c.auth_failures,
                        "campaign_failed_provider_auth"
                    );
                }
                Ok(())
            });
            return;
        }

        if sent > 0 || failed > 0 {
            // A batch that got through resets the consecutive-failure count.
            let _ = self.store.try_update_campaign(campaign_id, |c| {
                c.auth_failures = 0;
                Ok(())
            });
        }

        info!(
            campaign_id = %campaign_id,
            batch_index = batch_index,
            sent = sent,
            failed = failed,
            "dispatch_batch_complete"
        );

        self.try_complete(campaign_id);
    }

    /// Completion check, run after every batch.
    ///
    /// Robust to batches finishing out of order or being retried: the
    /// comparison and the transition happen under the campaign write lock,
    /// so concurrent checks flip the status exactly once.
    fn try_complete(&self, campaign_id: CampaignId) {
        let done = self
            .store
            .distinct_contacts(campaign_id, &[EventType::Sent, EventType::Failed]);

        let _ = self.store.try_update_campaign(campaign_id, |c| {
            if c.status == CampaignStatus::Sending
                && c.stats.total_recipients > 0
                && done >= c.stats.total_recipients
            {
                c.status = CampaignStatus::Sent;
                c.completed_at = Some(Utc::now());
                info!(
                    campaign_id = %c.id,
                    total_recipients = c.stats.total_recipients,
                    "campaign_completed"
                );
            }
            Ok(())
        });
    }

    fn transition(&self, id: CampaignId, to: CampaignStatus) -> Result<(), EngineError> {
        self.store.try_update_campaign(id, |c| {
            guard(c.status, to)?;
            c.status = to;
            Ok(())
        })
    }
}

fn guard(from: CampaignStatus, to: CampaignStatus) -> Result<(), EngineError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CampaignContent, CampaignSettings, Contact, List, Provider};
    use crate::send::TransportResult;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MockTransport {
        calls: Mutex<Vec<String>>,
        reject: HashSet<String>,
        auth_fail: bool,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reject: HashSet::new(),
                auth_fail: false,
            }
        }

        fn result_for(&self, to: &str) -> TransportResult {
            self.calls.lock().unwrap().push(to.to_string());
            if self.auth_fail {
                TransportResult::AuthFailed {
                    reason: "expired credentials".to_string(),
                }
            } else if self.reject.contains(to) {
                TransportResult::Rejected {
                    reason: "blocked by carrier".to_string(),
                }
            } else {
                TransportResult::Accepted {
                    provider_message_id: Some(format!("prov-{}", to)),
                }
            }
        }
    }

    #[async_trait]
    impl ChannelTransport for MockTransport {
        async fn send_email(
            &self,
            _provider: &Provider,
            to: &str,
            _subject: &str,
            _html: &str,
            _from_name: &str,
            _from_address: &str,
        ) -> TransportResult {
            self.result_for(to)
        }

        async fn send_sms(
            &self,
            _provider: &Provider,
            to_e164: &str,
            _body: &str,
            _sender_name: &str,
        ) -> TransportResult {
            self.result_for(to_e164)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        dispatcher: Dispatcher,
        include: Uuid,
        provider_id: Uuid,
    }

    fn harness_with(transport: MockTransport, provider: Provider, config: Config) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let provider_id = provider.id;
        store.insert_provider(provider);
        let include = List {
            id: Uuid::new_v4(),
            name: "all".to_string(),
        };
        let include_id = include.id;
        store.insert_list(include);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::new(QuotaGuard::new()),
            Arc::new(transport),
            Arc::new(config),
        );
        Harness {
            store,
            dispatcher,
            include: include_id,
            provider_id,
        }
    }

    fn harness() -> Harness {
        harness_with(
            MockTransport::new(),
            Provider::new("gateway", 10_000, 10_000),
            Config::for_tests(),
        )
    }

    impl Harness {
        fn sms_campaign(&self) -> CampaignId {
            let mut campaign = Campaign::new(
                Uuid::new_v4(),
                self.provider_id,
                CampaignContent::Sms {
                    template: "Oi {{first_name}}".to_string(),
                    sender_name: "Acme".to_string(),
                },
            );
            campaign.include_list_ids = vec![self.include];
            let id = campaign.id;
            self.store.insert_campaign(campaign);
            id
        }

        fn add_recipients(&self, n: usize) -> Vec<ContactId> {
            (0..n)
                .map(|i| {
                    let contact =
                        Contact::new(None, Some(format!("+55119999{:05}", i)));
                    let id = contact.id;
                    self.store.insert_contact(contact);
                    self.store.add_to_list(self.include, id);
                    id
                })
                .collect()
        }

        async fn wait_for_status(&self, id: CampaignId, status: CampaignStatus) {
            for _ in 0..500 {
                if self.store.campaign(id).unwrap().status == status {
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
            panic!(
                "timed out waiting for {:?}, campaign is {:?}",
                status,
                self.store.campaign(id).unwrap().status
            );
        }

        async fn wait_until(&self, f: impl Fn() -> bool) {
            for _ in 0..500 {
                if f() {
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
            panic!("timed out waiting for condition");
        }
    }

    #[test]
    fn test_transition_table() {
        use CampaignStatus::*;
        assert!(can_transition(Draft, Sending));
        assert!(can_transition(Scheduled, Sending));
        assert!(can_transition(Sending, Paused));
        assert!(can_transition(Paused, Sending));
        assert!(can_transition(Sending, Sent));
        assert!(can_transition(Sending, Failed));
        assert!(can_transition(Paused, Cancelled));

        assert!(!can_transition(Sent, Sending));
        assert!(!can_transition(Cancelled, Sending));
        assert!(!can_transition(Failed, Sending));
        assert!(!can_transition(Draft, Sent));
        assert!(!can_transition(Paused, Sent));
        assert!(!can_transition(Sent, Cancelled));
    }

    #[tokio::test]
    async fn test_send_guards() {
        let fx = harness();

        // Empty content
        let mut empty = Campaign::new(
            Uuid::new_v4(),
            fx.provider_id,
            CampaignContent::Sms {
                template: "  ".to_string(),
                sender_name: "Acme".to_string(),
            },
        );
        empty.include_list_ids = vec![fx.include];
        let empty_id = empty.id;
        fx.store.insert_campaign(empty);
        assert!(matches!(
            fx.dispatcher.send(empty_id),
            Err(EngineError::EmptyContent)
        ));

        // No recipients
        let no_recipients = fx.sms_campaign();
        assert!(matches!(
            fx.dispatcher.send(no_recipients),
            Err(EngineError::NoEligibleRecipients)
        ));

        // Unknown campaign
        assert!(matches!(
            fx.dispatcher.send(Uuid::new_v4()),
            Err(EngineError::CampaignNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_completes_campaign_exactly_once() {
        let fx = harness();
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(5);

        fx.dispatcher.send(campaign_id).unwrap();

        // Sending twice is rejected by the state machine.
        assert!(matches!(
            fx.dispatcher.send(campaign_id),
            Err(EngineError::InvalidTransition { .. })
        ));

        fx.wait_for_status(campaign_id, CampaignStatus::Sent).await;

        let campaign = fx.store.campaign(campaign_id).unwrap();
        assert_eq!(campaign.stats.total_recipients, 5);
        assert_eq!(campaign.stats.total_sent, 5);
        assert!(campaign.completed_at.is_some());
        assert!(campaign.started_at.is_some());
        assert_eq!(fx.store.events_for(campaign_id).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_batches_complete_out_of_order_safe() {
        let mut config = Config::for_tests();
        config.batch_size = 2;
        let fx = harness_with(
            MockTransport::new(),
            Provider::new("gateway", 10_000, 10_000),
            config,
        );
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(7); // 4 batches

        fx.dispatcher.send(campaign_id).unwrap();
        fx.wait_for_status(campaign_id, CampaignStatus::Sent).await;

        let campaign = fx.store.campaign(campaign_id).unwrap();
        assert_eq!(campaign.stats.total_sent, 7);
        assert_eq!(campaign.status, CampaignStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipient_failure_does_not_abort_batch() {
        let mut transport = MockTransport::new();
        transport.reject.insert("+5511999900001".to_string());
        let fx = harness_with(
            transport,
            Provider::new("gateway", 10_000, 10_000),
            Config::for_tests(),
        );
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(3);

        fx.dispatcher.send(campaign_id).unwrap();
        fx.wait_for_status(campaign_id, CampaignStatus::Sent).await;

        let stats = fx.store.campaign(campaign_id).unwrap().stats;
        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.total_failed_or_bounced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_defers_remainder() {
        let fx = harness_with(
            MockTransport::new(),
            Provider::new("gateway", 10, 10_000),
            Config::for_tests(),
        );
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(15);

        fx.dispatcher.send(campaign_id).unwrap();

        let store = Arc::clone(&fx.store);
        fx.wait_until(|| store.deferred_count(campaign_id) == 5).await;

        let campaign = fx.store.campaign(campaign_id).unwrap();
        // 10 events within the first window; the rest deferred, not dropped.
        assert_eq!(fx.store.events_for(campaign_id).len(), 10);
        assert_eq!(campaign.stats.total_sent, 10);
        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(fx.store.deferred_count(campaign_id), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_fails_campaign() {
        let mut transport = MockTransport::new();
        transport.auth_fail = true;
        let mut config = Config::for_tests();
        config.auth_failure_threshold = 1;
        let fx = harness_with(
            transport,
            Provider::new("gateway", 10_000, 10_000),
            config,
        );
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(3);

        fx.dispatcher.send(campaign_id).unwrap();
        fx.wait_for_status(campaign_id, CampaignStatus::Failed).await;

        // Nothing was recorded as sent and the untried recipients were parked.
        let stats = fx.store.campaign(campaign_id).unwrap().stats;
        assert_eq!(stats.total_sent, 0);
        assert_eq!(fx.store.deferred_count(campaign_id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_defers_pending_batches_and_resume_finishes() {
        let mut config = Config::for_tests();
        config.batch_size = 2;
        let fx = harness_with(
            MockTransport::new(),
            Provider::new("gateway", 10_000, 10_000),
            config,
        );
        let campaign_id = fx.sms_campaign();
        // Space the batches one second apart so the pause lands between them.
        fx.store
            .try_update_campaign(campaign_id, |c| {
                c.settings = CampaignSettings {
                    send_speed_secs: Some(1),
                    ..Default::default()
                };
                Ok(())
            })
            .unwrap();
        fx.add_recipients(6); // 3 batches at t=0s, 1s, 2s

        fx.dispatcher.send(campaign_id).unwrap();

        let store = Arc::clone(&fx.store);
        fx.wait_until(|| !store.events_for(campaign_id).is_empty()).await;
        fx.dispatcher.pause(campaign_id).unwrap();

        // The delayed batches wake, observe the pause and defer themselves.
        let store = Arc::clone(&fx.store);
        fx.wait_until(|| store.deferred_count(campaign_id) == 4).await;
        assert_eq!(
            fx.store.campaign(campaign_id).unwrap().status,
            CampaignStatus::Paused
        );

        fx.dispatcher.resume(campaign_id).unwrap();
        fx.wait_for_status(campaign_id, CampaignStatus::Sent).await;
        assert_eq!(fx.store.campaign(campaign_id).unwrap().stats.total_sent, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_future_batches_keeps_recorded_events() {
        let mut config = Config::for_tests();
        config.batch_size = 2;
        let fx = harness_with(
            MockTransport::new(),
            Provider::new("gateway", 10_000, 10_000),
            config,
        );
        let campaign_id = fx.sms_campaign();
        fx.store
            .try_update_campaign(campaign_id, |c| {
                c.settings = CampaignSettings {
                    send_speed_secs: Some(1),
                    ..Default::default()
                };
                Ok(())
            })
            .unwrap();
        fx.add_recipients(4); // 2 batches

        fx.dispatcher.send(campaign_id).unwrap();
        let store = Arc::clone(&fx.store);
        fx.wait_until(|| store.events_for(campaign_id).len() == 2).await;

        fx.dispatcher.cancel(campaign_id).unwrap();

        // Give the second batch time to wake and abandon itself.
        sleep(Duration::from_secs(3)).await;

        let campaign = fx.store.campaign(campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Cancelled);
        // Events from the completed batch survive; the cancelled one sent nothing.
        assert_eq!(fx.store.events_for(campaign_id).len(), 2);
        assert!(campaign.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_delete_only_from_draft() {
        let fx = harness();
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(1);

        fx.dispatcher.send(campaign_id).unwrap();
        assert!(matches!(
            fx.dispatcher.delete(campaign_id),
            Err(EngineError::DeleteForbidden(_))
        ));

        let draft_id = fx.sms_campaign();
        fx.dispatcher.delete(draft_id).unwrap();
        assert!(fx.store.campaign(draft_id).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_creates_fresh_draft() {
        let fx = harness();
        let campaign_id = fx.sms_campaign();
        let copy = fx.dispatcher.duplicate(campaign_id).unwrap();

        assert_ne!(copy.id, campaign_id);
        assert_eq!(copy.status, CampaignStatus::Draft);
        assert!(fx.store.campaign(copy.id).is_some());
    }

    #[tokio::test]
    async fn test_estimate_cost_sms() {
        let fx = harness();
        let campaign_id = fx.sms_campaign();
        fx.add_recipients(4);

        let estimate = fx.dispatcher.estimate_cost(campaign_id).unwrap();
        assert_eq!(estimate.recipients, 4);
        let info = estimate.segments_per_message.unwrap();
        // "Oi " + opt-out disclaimer fits one GSM-7 segment.
        assert_eq!(info.segments, 1);
        assert_eq!(estimate.total_segments, Some(4));
    }

    #[tokio::test]
    async fn test_schedule_sets_status_and_timestamp() {
        let fx = harness();
        let campaign_id = fx.sms_campaign();
        let at = Utc::now() + chrono::Duration::hours(1);

        fx.dispatcher.schedule(campaign_id, at).unwrap();

        let campaign = fx.store.campaign(campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.scheduled_at, Some(at));

        // Re-scheduling is allowed.
        let later = at + chrono::Duration::hours(1);
        fx.dispatcher.schedule(campaign_id, later).unwrap();
        assert_eq!(
            fx.store.campaign(campaign_id).unwrap().scheduled_at,
            Some(later)
        );
    }
}
