//! In-process store used by tests and local runs without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChannelOutcome, ChatFilter, DonationFilter, MarkRead, Store};
use crate::types::{
    ChatMessage, ChatRoom, ChatStatus, ContactProfile, DeviceToken, Donation, DonationStatus,
    Notification, Participant, Platform, ReadReceipt, Role, Stats, User,
};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    donations: HashMap<Uuid, Donation>,
    chats: HashMap<Uuid, ChatRoom>,
    notifications: HashMap<Uuid, Notification>,
    device_tokens: Vec<DeviceToken>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_notifications(&self) -> Vec<Notification> {
        let inner = self.inner.read().await;
        let mut all: Vec<Notification> = inner.notifications.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.inner.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
        newest_first(&mut users, |u| u.created_at);
        Ok(users)
    }

    async fn set_user_verified(&self, id: Uuid, verified: bool) -> Result<Option<User>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).map(|u| {
            u.verified = verified;
            u.clone()
        }))
    }

    async fn verified_organizations(&self) -> Result<Vec<User>> {
        let mut orgs: Vec<User> = self
            .inner
            .read()
            .await
            .users
            .values()
            .filter(|u| u.role == Role::Organization && u.verified)
            .cloned()
            .collect();
        newest_first(&mut orgs, |u| u.created_at);
        Ok(orgs)
    }

    async fn contact_profile(&self, user_id: Uuid) -> Result<Option<ContactProfile>> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&user_id).map(|u| ContactProfile {
            user_id,
            email: u.email.clone(),
            devices: inner
                .device_tokens
                .iter()
                .filter(|t| t.user_id == user_id && t.active)
                .cloned()
                .collect(),
        }))
    }

    async fn insert_donation(&self, donation: &Donation) -> Result<()> {
        self.inner
            .write()
            .await
            .donations
            .insert(donation.id, donation.clone());
        Ok(())
    }

    async fn get_donation(&self, id: Uuid) -> Result<Option<Donation>> {
        Ok(self.inner.read().await.donations.get(&id).cloned())
    }

    async fn list_donations(&self, filter: DonationFilter) -> Result<Vec<Donation>> {
        let inner = self.inner.read().await;
        let mut donations: Vec<Donation> = inner
            .donations
            .values()
            .filter(|d| match filter {
                DonationFilter::All => true,
                DonationFilter::Donor(id) => d.donor_id == id,
                DonationFilter::VisibleToOrganization(id) => {
                    d.status == DonationStatus::Pending
                        || d.accepted_by.as_ref().map(|a| a.id) == Some(id)
                }
            })
            .cloned()
            .collect();
        newest_first(&mut donations, |d| d.created_at);
        Ok(donations)
    }

    async fn update_donation_if(&self, donation: &Donation, expected: DonationStatus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.donations.get_mut(&donation.id) {
            Some(stored) if stored.status == expected => {
                *stored = donation.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expiring_donations(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        statuses: &[DonationStatus],
    ) -> Result<Vec<Donation>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Donation> = inner
            .donations
            .values()
            .filter(|d| d.expiry_time > after && d.expiry_time <= until)
            .filter(|d| statuses.contains(&d.status))
            .cloned()
            .collect();
        newest_first(&mut matches, |d| d.created_at);
        Ok(matches)
    }

    async fn stats(&self) -> Result<Stats> {
        let inner = self.inner.read().await;
        let mut stats = Stats::default();
        for user in inner.users.values() {
            stats.users.total += 1;
            match user.role {
                Role::Donor => stats.users.donors += 1,
                Role::Organization => stats.users.ngos += 1,
                Role::Admin => {}
            }
            if user.verified {
                stats.users.verified += 1;
            } else {
                stats.users.unverified += 1;
            }
        }
        for donation in inner.donations.values() {
            stats.donations.total += 1;
            match donation.status {
                DonationStatus::Pending => stats.donations.pending += 1,
                DonationStatus::Accepted => stats.donations.accepted += 1,
                DonationStatus::InTransit => stats.donations.in_transit += 1,
                DonationStatus::PickedUp => stats.donations.picked_up += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn get_chat(&self, id: Uuid) -> Result<Option<ChatRoom>> {
        Ok(self.inner.read().await.chats.get(&id).cloned())
    }

    async fn get_chat_by_donation(&self, donation_id: Uuid) -> Result<Option<ChatRoom>> {
        Ok(self
            .inner
            .read()
            .await
            .chats
            .values()
            .find(|c| c.donation_id == donation_id)
            .cloned())
    }

    async fn create_chat(&self, room: &ChatRoom) -> Result<ChatRoom> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.chats.values().find(|c| c.donation_id == room.donation_id) {
            return Ok(existing.clone());
        }
        inner.chats.insert(room.id, room.clone());
        Ok(room.clone())
    }

    async fn add_participant(&self, chat_id: Uuid, participant: &Participant) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| anyhow::anyhow!("Chat {} not found", chat_id))?;
        if chat.has_participant(participant.user_id) {
            return Ok(false);
        }
        chat.participants.push(participant.clone());
        Ok(true)
    }

    async fn append_message(&self, chat_id: Uuid, message: &ChatMessage) -> Result<()> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| anyhow::anyhow!("Chat {} not found", chat_id))?;
        chat.messages.push(message.clone());
        chat.last_activity = message.timestamp;
        Ok(())
    }

    async fn mark_messages_read(&self, chat_id: Uuid, reader: Uuid, at: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| anyhow::anyhow!("Chat {} not found", chat_id))?;
        let mut marked = 0;
        for message in chat.messages.iter_mut() {
            if message.sender_id != reader && !message.is_read_by(reader) {
                message.read.push(ReadReceipt {
                    user_id: reader,
                    read_at: at,
                });
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn set_chat_status(&self, donation_id: Uuid, status: ChatStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        for chat in inner.chats.values_mut().filter(|c| c.donation_id == donation_id) {
            chat.status = status;
        }
        Ok(())
    }

    async fn list_chats(&self, filter: ChatFilter) -> Result<Vec<ChatRoom>> {
        let inner = self.inner.read().await;
        let mut chats: Vec<ChatRoom> = inner
            .chats
            .values()
            .filter(|c| match filter {
                ChatFilter::Active => c.status == ChatStatus::Active,
                ChatFilter::Participant(user_id) => c.has_participant(user_id),
            })
            .cloned()
            .collect();
        newest_first(&mut chats, |c| c.last_activity);
        Ok(chats)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.inner
            .write()
            .await
            .notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn record_delivery(&self, id: Uuid, outcomes: &[ChannelOutcome<'_>]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(n) = inner.notifications.get_mut(&id) {
            for (channel, sent) in outcomes.iter().filter(|(_, sent)| *sent) {
                match *channel {
                    "email" => n.email_sent = *sent,
                    "push" => n.push_sent = *sent,
                    other => tracing::debug!("No delivery flag for channel {}", other),
                }
            }
        }
        Ok(())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.inner.read().await.notifications.get(&id).cloned())
    }

    async fn list_notifications(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let inner = self.inner.read().await;
        let mut list: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut list, |n| n.created_at);
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<MarkRead> {
        let mut inner = self.inner.write().await;
        Ok(match inner.notifications.get_mut(&id) {
            Some(n) if n.user_id == user_id => {
                if n.read {
                    MarkRead::AlreadyRead
                } else {
                    n.read = true;
                    MarkRead::Marked
                }
            }
            _ => MarkRead::NotFound,
        })
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for n in inner
            .notifications
            .values_mut()
            .filter(|n| n.user_id == user_id && !n.read)
        {
            n.read = true;
            count += 1;
        }
        Ok(count)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<i64> {
        Ok(self
            .inner
            .read()
            .await
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as i64)
    }

    async fn upsert_device_token(&self, user_id: Uuid, token: &str, platform: Platform) -> Result<DeviceToken> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        if let Some(existing) = inner
            .device_tokens
            .iter_mut()
            .find(|t| t.user_id == user_id && t.token == token)
        {
            existing.active = true;
            existing.platform = platform;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let device = DeviceToken {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            platform,
            active: true,
            created_at: now,
            updated_at: now,
        };
        inner.device_tokens.push(device.clone());
        Ok(device)
    }

    async fn deactivate_device_token(&self, user_id: Uuid, token: &str) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for t in inner
            .device_tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.token == token && t.active)
        {
            t.active = false;
            t.updated_at = Utc::now();
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, Coordinates, Location, NewDonation};
    use chrono::Duration;

    fn user(role: Role, verified: bool) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Test".into(),
            email: format!("{}@example.org", Uuid::new_v4()),
            role,
            organization: None,
            verified,
            created_at: Utc::now(),
        }
    }

    fn donation(donor: &User, expires_in: Duration) -> Donation {
        let actor = Actor::new(donor.id, donor.name.clone(), donor.role);
        Donation::from_new(
            &actor,
            NewDonation {
                food_name: "Rice".into(),
                quantity: "5kg".into(),
                description: None,
                expiry_time: Utc::now() + expires_in,
                image: None,
                location: Location {
                    address: None,
                    coordinates: Coordinates { lat: 0.0, lng: 0.0 },
                },
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_status() {
        let store = MemoryStore::new();
        let donor = user(Role::Donor, true);
        let d = donation(&donor, Duration::hours(5));
        store.insert_donation(&d).await.unwrap();

        let mut accepted = d.clone();
        accepted.status = DonationStatus::Accepted;
        assert!(store.update_donation_if(&accepted, DonationStatus::Pending).await.unwrap());

        let mut rejected = d.clone();
        rejected.status = DonationStatus::Rejected;
        assert!(!store.update_donation_if(&rejected, DonationStatus::Pending).await.unwrap());
        assert_eq!(
            store.get_donation(d.id).await.unwrap().unwrap().status,
            DonationStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_expiring_window_is_half_open() {
        let store = MemoryStore::new();
        let donor = user(Role::Donor, true);
        let now = Utc::now();
        let inside = donation(&donor, Duration::hours(3));
        let past = donation(&donor, Duration::hours(-1));
        let far = donation(&donor, Duration::hours(30));
        for d in [&inside, &past, &far] {
            store.insert_donation(d).await.unwrap();
        }

        let found = store
            .expiring_donations(now, now + Duration::hours(24), &[DonationStatus::Pending])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, inside.id);
    }

    #[tokio::test]
    async fn test_device_token_reactivates_instead_of_duplicating() {
        let store = MemoryStore::new();
        let u = user(Role::Donor, true);
        store.insert_user(&u).await.unwrap();

        store.upsert_device_token(u.id, "tok", Platform::Android).await.unwrap();
        assert_eq!(store.deactivate_device_token(u.id, "tok").await.unwrap(), 1);
        assert!(store.contact_profile(u.id).await.unwrap().unwrap().devices.is_empty());

        store.upsert_device_token(u.id, "tok", Platform::Android).await.unwrap();
        let profile = store.contact_profile(u.id).await.unwrap().unwrap();
        assert_eq!(profile.devices.len(), 1);
        assert!(profile.devices[0].active);
    }

    #[tokio::test]
    async fn test_notification_read_state() {
        let store = MemoryStore::new();
        let u = user(Role::Donor, true);
        let n = Notification::new(u.id, "t", "m", crate::types::NotificationKind::Donation, None);
        store.insert_notification(&n).await.unwrap();

        assert_eq!(store.count_unread_notifications(u.id).await.unwrap(), 1);
        assert_eq!(store.mark_notification_read(Uuid::new_v4(), n.id).await.unwrap(), MarkRead::NotFound);
        assert_eq!(store.mark_notification_read(u.id, n.id).await.unwrap(), MarkRead::Marked);
        assert_eq!(store.mark_notification_read(u.id, n.id).await.unwrap(), MarkRead::AlreadyRead);
        assert_eq!(store.count_unread_notifications(u.id).await.unwrap(), 0);
    }
}
