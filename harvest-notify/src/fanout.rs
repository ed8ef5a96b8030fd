//! Turns domain events into persisted notifications and delivers each one
//! over every channel the recipient can be reached on.
//!
//! A notification row is written before any channel is tried. Channels run
//! concurrently and independently; their outcomes are written back onto the
//! row once all of them have finished. Nothing here fails the caller.

use futures::future::join_all;
use harvest_core::config::FanoutConfig;
use harvest_core::events::{EventSink, NotifyEvent};
use harvest_core::participants;
use harvest_core::redis::{incr_unread, RedisPool};
use harvest_core::store::Store;
use harvest_core::types::{Notification, NotificationKind};
use harvest_delivery::{Channel, DeliveryError, OutboundMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::templates::{self, Template};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: &'static str,
    pub sent: bool,
}

/// What happened for one recipient. `notification_id` is `None` when the
/// row could not be persisted, in which case no channel was tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientReport {
    pub user_id: Uuid,
    pub notification_id: Option<Uuid>,
    pub channels: Vec<ChannelReport>,
}

impl RecipientReport {
    pub fn sent_on(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c.channel == channel && c.sent)
    }
}

#[derive(Clone)]
pub struct FanoutEngine {
    store: Arc<dyn Store>,
    channels: Vec<Arc<dyn Channel>>,
    redis_pool: Option<RedisPool>,
    channel_timeout: Duration,
    max_concurrency: usize,
}

impl FanoutEngine {
    pub fn new(store: Arc<dyn Store>, channels: Vec<Arc<dyn Channel>>, config: &FanoutConfig) -> Self {
        FanoutEngine {
            store,
            channels,
            redis_pool: None,
            channel_timeout: Duration::from_secs(config.channel_timeout_secs.max(1)),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Keeps the `UNREAD:{user}` counters in step with persisted rows.
    pub fn with_redis(mut self, redis_pool: Option<RedisPool>) -> Self {
        self.redis_pool = redis_pool;
        self
    }

    /// Creates one notification per distinct recipient and delivers it.
    pub async fn dispatch(
        &self,
        recipients: &[Uuid],
        title: &str,
        body: &str,
        kind: NotificationKind,
        donation_id: Option<Uuid>,
    ) -> Vec<RecipientReport> {
        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = recipients.iter().copied().filter(|id| seen.insert(*id)).collect();
        if unique.is_empty() {
            return Vec::new();
        }

        let permits = Semaphore::new(self.max_concurrency);
        let permits = &permits;
        let deliveries = unique.into_iter().map(|user_id| async move {
            let _permit = permits.acquire().await.ok();
            self.deliver_to(user_id, title, body, kind, donation_id).await
        });
        join_all(deliveries).await
    }

    async fn deliver_to(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        kind: NotificationKind,
        donation_id: Option<Uuid>,
    ) -> RecipientReport {
        let mut report = RecipientReport {
            user_id,
            notification_id: None,
            channels: Vec::new(),
        };

        let notification = Notification::new(user_id, title, body, kind, donation_id);
        if let Err(e) = self.store.insert_notification(&notification).await {
            tracing::error!("Failed to persist {} notification for {}: {}", kind, user_id, e);
            return report;
        }
        report.notification_id = Some(notification.id);
        self.bump_unread(user_id).await;

        let profile = match self.store.contact_profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::warn!("Notification {} stored for unknown user {}", notification.id, user_id);
                return report;
            }
            Err(e) => {
                tracing::error!("Failed to load contact profile for {}: {}", user_id, e);
                return report;
            }
        };

        let message = OutboundMessage {
            title: title.to_string(),
            body: body.to_string(),
            metadata: HashMap::from([
                ("type".to_string(), kind.as_str().to_string()),
                (
                    "donationId".to_string(),
                    donation_id.map(|id| id.to_string()).unwrap_or_default(),
                ),
                ("notificationId".to_string(), notification.id.to_string()),
            ]),
        };

        let notification_id = notification.id;
        let attempts = self.channels.iter().filter_map(|channel| {
            let destinations = channel.destinations(&profile);
            if destinations.is_empty() {
                return None;
            }
            let message = &message;
            Some(async move {
                let outcome =
                    match tokio::time::timeout(self.channel_timeout, channel.send(&destinations, message)).await {
                        Ok(result) => result,
                        Err(_) => Err(DeliveryError::Timeout),
                    };
                if let Err(e) = &outcome {
                    tracing::warn!(
                        "{} delivery of notification {} to {} failed: {}",
                        channel.name(),
                        notification_id,
                        user_id,
                        e
                    );
                }
                ChannelReport {
                    channel: channel.name(),
                    sent: outcome.is_ok(),
                }
            })
        });
        report.channels = join_all(attempts).await;

        let outcomes: Vec<(&str, bool)> = report.channels.iter().map(|c| (c.channel, c.sent)).collect();
        if let Err(e) = self.store.record_delivery(notification.id, &outcomes).await {
            tracing::error!("Failed to record delivery outcome for notification {}: {}", notification.id, e);
        }

        report
    }

    async fn bump_unread(&self, user_id: Uuid) {
        if let Some(pool) = &self.redis_pool {
            if let Err(e) = incr_unread(pool, user_id).await {
                tracing::warn!("Failed to increment unread count for {}: {}", user_id, e);
            }
        }
    }

    async fn send_template(
        &self,
        recipients: &[Uuid],
        template: &Template,
        kind: NotificationKind,
        donation_id: Uuid,
    ) -> Vec<RecipientReport> {
        self.dispatch(recipients, &template.title, &template.body, kind, Some(donation_id))
            .await
    }

    /// Applies the recipient policy of `event` and dispatches.
    pub async fn handle_event(&self, event: NotifyEvent) -> Vec<RecipientReport> {
        tracing::debug!("Fanning out {} for donation {}", event.event_type(), event.donation_id());

        match event {
            NotifyEvent::DonationCreated(donation) => {
                let organizations = match self.store.verified_organizations().await {
                    Ok(orgs) => orgs,
                    Err(e) => {
                        tracing::error!("Failed to load verified organizations: {}", e);
                        return Vec::new();
                    }
                };
                let recipients: Vec<Uuid> = organizations.iter().map(|u| u.id).collect();
                let template = templates::new_donation(&donation);
                self.send_template(&recipients, &template, NotificationKind::Donation, donation.id)
                    .await
            }
            NotifyEvent::Lifecycle(change) => {
                let Some(template) = templates::status_update(&change.donation, change.new_status) else {
                    tracing::debug!("No notification for transition to {}", change.new_status);
                    return Vec::new();
                };
                let recipients = participants::counterparts(&change.donation, change.actor_role);
                self.send_template(&recipients, &template, NotificationKind::StatusUpdate, change.donation_id)
                    .await
            }
            NotifyEvent::Expiry(alert) => {
                let mut reports = Vec::new();
                for participant in participants::resolve(&alert.donation) {
                    let template = templates::expiry(&alert.donation, participant.role);
                    reports.extend(
                        self.send_template(
                            &[participant.user_id],
                            &template,
                            NotificationKind::ExpiryAlert,
                            alert.donation.id,
                        )
                        .await,
                    );
                }
                reports
            }
        }
    }
}

/// Fire-and-forget: the event is handled on its own task so the emitter
/// never waits on delivery.
impl EventSink for FanoutEngine {
    fn emit(&self, event: NotifyEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, dropping {} event", event.event_type());
            return;
        };
        let engine = self.clone();
        runtime.spawn(async move {
            engine.handle_event(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use harvest_core::events::{ExpiryEvent, LifecycleEvent};
    use harvest_core::store::MemoryStore;
    use harvest_core::types::{
        AcceptedBy, Actor, ContactProfile, Coordinates, Donation, DonationStatus, Location,
        NewDonation, Platform, Role, User,
    };
    use harvest_delivery::{Destination, RecordingChannel};

    fn user(role: Role, verified: bool) -> User {
        let id = Uuid::new_v4();
        User {
            id,
            name: format!("user-{}", id),
            email: format!("{}@example.org", id),
            role,
            organization: None,
            verified,
            created_at: Utc::now(),
        }
    }

    fn donation(donor: &User) -> Donation {
        let actor = Actor::new(donor.id, donor.name.clone(), Role::Donor);
        Donation::from_new(
            &actor,
            NewDonation {
                food_name: "Rice".into(),
                quantity: "10 kg".into(),
                description: None,
                expiry_time: Utc::now() + ChronoDuration::hours(3),
                image: None,
                location: Location {
                    address: None,
                    coordinates: Coordinates { lat: 0.0, lng: 0.0 },
                },
            },
            Utc::now(),
        )
    }

    struct Harness {
        store: Arc<MemoryStore>,
        email: Arc<RecordingChannel>,
        push: Arc<RecordingChannel>,
        engine: FanoutEngine,
    }

    fn harness(email: RecordingChannel, push: RecordingChannel) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let email = Arc::new(email);
        let push = Arc::new(push);
        let channels = vec![email.clone() as Arc<dyn Channel>, push.clone() as Arc<dyn Channel>];
        let engine = FanoutEngine::new(store.clone(), channels, &FanoutConfig::default());
        Harness {
            store,
            email,
            push,
            engine,
        }
    }

    #[tokio::test]
    async fn test_one_row_per_recipient_with_independent_flags() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let with_device = user(Role::Organization, true);
        let without_device = user(Role::Organization, true);
        h.store.insert_user(&with_device).await.unwrap();
        h.store.insert_user(&without_device).await.unwrap();
        h.store
            .upsert_device_token(with_device.id, "tok-1", Platform::Android)
            .await
            .unwrap();

        let reports = h
            .engine
            .dispatch(
                &[with_device.id, without_device.id, with_device.id],
                "Title",
                "Body",
                NotificationKind::Donation,
                None,
            )
            .await;
        assert_eq!(reports.len(), 2);

        let rows = h.store.all_notifications().await;
        assert_eq!(rows.len(), 2);
        let row_for = |id: Uuid| rows.iter().find(|n| n.user_id == id).unwrap().clone();
        let a = row_for(with_device.id);
        let b = row_for(without_device.id);
        assert!(a.email_sent && a.push_sent);
        assert!(b.email_sent && !b.push_sent);

        assert_eq!(h.email.sent().len(), 2);
        let pushes = h.push.sent();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, vec![Destination::device("tok-1", Platform::Android)]);
        assert_eq!(
            pushes[0].1.metadata.get("notificationId"),
            Some(&a.id.to_string())
        );
    }

    #[tokio::test]
    async fn test_push_failure_keeps_email_flag() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push().failing());
        let org = user(Role::Organization, true);
        h.store.insert_user(&org).await.unwrap();
        h.store.upsert_device_token(org.id, "tok", Platform::Web).await.unwrap();

        let reports = h
            .engine
            .dispatch(&[org.id], "T", "B", NotificationKind::StatusUpdate, None)
            .await;
        assert!(reports[0].sent_on("email"));
        assert!(!reports[0].sent_on("push"));

        let row = h.store.all_notifications().await.pop().unwrap();
        assert!(row.email_sent);
        assert!(!row.push_sent);
    }

    #[tokio::test]
    async fn test_empty_recipient_set_is_a_no_op() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let reports = h
            .engine
            .dispatch(&[], "T", "B", NotificationKind::Donation, None)
            .await;
        assert!(reports.is_empty());
        assert!(h.store.all_notifications().await.is_empty());
        assert!(h.email.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_still_gets_a_row() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let ghost = Uuid::new_v4();
        let reports = h
            .engine
            .dispatch(&[ghost], "T", "B", NotificationKind::Donation, None)
            .await;
        assert!(reports[0].notification_id.is_some());
        assert!(reports[0].channels.is_empty());
        assert_eq!(h.store.all_notifications().await.len(), 1);
    }

    struct SlowChannel;

    #[async_trait]
    impl Channel for SlowChannel {
        fn name(&self) -> &'static str {
            "email"
        }

        fn destinations(&self, profile: &ContactProfile) -> Vec<Destination> {
            vec![Destination::email(profile.email.clone())]
        }

        async fn send(&self, _d: &[Destination], _m: &OutboundMessage) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_channel_times_out() {
        let store = Arc::new(MemoryStore::new());
        let org = user(Role::Organization, true);
        store.insert_user(&org).await.unwrap();
        let channels = vec![Arc::new(SlowChannel) as Arc<dyn Channel>];
        let config = FanoutConfig {
            channel_timeout_secs: 1,
            max_concurrency: 4,
        };
        let engine = FanoutEngine::new(store.clone(), channels, &config);

        let reports = engine
            .dispatch(&[org.id], "T", "B", NotificationKind::Donation, None)
            .await;
        assert!(!reports[0].sent_on("email"));
        assert!(!store.all_notifications().await[0].email_sent);
    }

    #[tokio::test]
    async fn test_new_donation_goes_to_verified_organizations_only() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let donor = user(Role::Donor, true);
        let verified = user(Role::Organization, true);
        let unverified = user(Role::Organization, false);
        for u in [&donor, &verified, &unverified] {
            h.store.insert_user(u).await.unwrap();
        }

        let reports = h
            .engine
            .handle_event(NotifyEvent::DonationCreated(donation(&donor)))
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].user_id, verified.id);
    }

    #[tokio::test]
    async fn test_status_update_goes_to_counterpart() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let donor = user(Role::Donor, true);
        let org = user(Role::Organization, true);
        h.store.insert_user(&donor).await.unwrap();
        h.store.insert_user(&org).await.unwrap();

        let mut d = donation(&donor);
        d.status = DonationStatus::Accepted;
        d.accepted_by = Some(AcceptedBy { id: org.id, name: org.name.clone() });

        let reports = h
            .engine
            .handle_event(NotifyEvent::Lifecycle(LifecycleEvent {
                donation_id: d.id,
                previous_status: DonationStatus::Pending,
                new_status: DonationStatus::Accepted,
                actor_role: Role::Organization,
                donation: d.clone(),
            }))
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].user_id, donor.id);

        d.status = DonationStatus::InTransit;
        let reports = h
            .engine
            .handle_event(NotifyEvent::Lifecycle(LifecycleEvent {
                donation_id: d.id,
                previous_status: DonationStatus::Accepted,
                new_status: DonationStatus::InTransit,
                actor_role: Role::Organization,
                donation: d,
            }))
            .await;
        assert!(reports.is_empty());
        assert_eq!(h.store.all_notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_on_accepted_donation_alerts_both_sides() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let donor = user(Role::Donor, true);
        let org = user(Role::Organization, true);
        h.store.insert_user(&donor).await.unwrap();
        h.store.insert_user(&org).await.unwrap();

        let mut d = donation(&donor);
        d.status = DonationStatus::Accepted;
        d.accepted_by = Some(AcceptedBy { id: org.id, name: org.name.clone() });

        let reports = h
            .engine
            .handle_event(NotifyEvent::Expiry(ExpiryEvent {
                donation: d,
                scanned_at: Utc::now(),
            }))
            .await;
        assert_eq!(reports.len(), 2);

        let rows = h.store.all_notifications().await;
        let donor_row = rows.iter().find(|n| n.user_id == donor.id).unwrap();
        let org_row = rows.iter().find(|n| n.user_id == org.id).unwrap();
        assert_eq!(donor_row.kind, NotificationKind::ExpiryAlert);
        assert!(donor_row.message.starts_with("Your donation \"Rice\""));
        assert!(org_row.message.contains("you accepted"));
    }

    fn cancelled(d: &Donation) -> NotifyEvent {
        let mut d = d.clone();
        d.status = DonationStatus::Cancelled;
        NotifyEvent::Lifecycle(LifecycleEvent {
            donation_id: d.id,
            previous_status: DonationStatus::Pending,
            new_status: DonationStatus::Cancelled,
            actor_role: Role::Donor,
            donation: d,
        })
    }

    #[tokio::test]
    async fn test_cancel_without_acceptor_notifies_nobody() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let donor = user(Role::Donor, true);
        let bystander = user(Role::Organization, true);
        h.store.insert_user(&donor).await.unwrap();
        h.store.insert_user(&bystander).await.unwrap();

        let reports = h.engine.handle_event(cancelled(&donation(&donor))).await;
        assert!(reports.is_empty());
        assert!(h.store.all_notifications().await.is_empty());
        assert!(h.email.sent().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_with_acceptor_notifies_the_organization() {
        let h = harness(RecordingChannel::email(), RecordingChannel::push());
        let donor = user(Role::Donor, true);
        let org = user(Role::Organization, true);
        h.store.insert_user(&donor).await.unwrap();
        h.store.insert_user(&org).await.unwrap();

        let mut d = donation(&donor);
        d.accepted_by = Some(AcceptedBy { id: org.id, name: org.name.clone() });

        let reports = h.engine.handle_event(cancelled(&d)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].user_id, org.id);

        let rows = h.store.all_notifications().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, org.id);
        assert_eq!(rows[0].kind, NotificationKind::StatusUpdate);
        assert_eq!(rows[0].donation_id, Some(d.id));
    }
}
