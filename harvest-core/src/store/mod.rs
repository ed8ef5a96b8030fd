//! Durable records for users, donations, chats, notifications and devices.
//!
//! Every donation write goes through [`Store::update_donation_if`], which only
//! succeeds while the stored status still equals the status the caller read.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    ChatMessage, ChatRoom, ChatStatus, ContactProfile, DeviceToken, Donation, DonationStatus,
    Notification, Participant, Platform, Stats, User,
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Newest notifications returned by an inbox listing.
pub const INBOX_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonationFilter {
    All,
    Donor(Uuid),
    /// Pending donations plus the ones this organization accepted.
    VisibleToOrganization(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFilter {
    Active,
    Participant(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkRead {
    NotFound,
    AlreadyRead,
    Marked,
}

/// Per-channel result of one delivery attempt, keyed by channel name.
pub type ChannelOutcome<'a> = (&'a str, bool);

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn set_user_verified(&self, id: Uuid, verified: bool) -> Result<Option<User>>;
    async fn verified_organizations(&self) -> Result<Vec<User>>;
    /// Email plus active device tokens, `None` for unknown users.
    async fn contact_profile(&self, user_id: Uuid) -> Result<Option<ContactProfile>>;

    async fn insert_donation(&self, donation: &Donation) -> Result<()>;
    async fn get_donation(&self, id: Uuid) -> Result<Option<Donation>>;
    async fn list_donations(&self, filter: DonationFilter) -> Result<Vec<Donation>>;
    /// Replaces the stored donation only if its status is still `expected`.
    /// Returns `false` when the race was lost or the donation is gone.
    async fn update_donation_if(&self, donation: &Donation, expected: DonationStatus) -> Result<bool>;
    /// Donations with `after < expiry_time <= until` in one of `statuses`.
    async fn expiring_donations(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        statuses: &[DonationStatus],
    ) -> Result<Vec<Donation>>;
    async fn stats(&self) -> Result<Stats>;

    async fn get_chat(&self, id: Uuid) -> Result<Option<ChatRoom>>;
    async fn get_chat_by_donation(&self, donation_id: Uuid) -> Result<Option<ChatRoom>>;
    /// Inserts the room unless the donation already has one; returns the stored room.
    async fn create_chat(&self, room: &ChatRoom) -> Result<ChatRoom>;
    /// Adds to the roster; `false` if the user was already on it.
    async fn add_participant(&self, chat_id: Uuid, participant: &Participant) -> Result<bool>;
    /// Appends to the log and bumps `last_activity` to the message timestamp.
    async fn append_message(&self, chat_id: Uuid, message: &ChatMessage) -> Result<()>;
    /// Adds `reader`'s receipt to every message they neither wrote nor read.
    /// Returns the number of receipts added.
    async fn mark_messages_read(&self, chat_id: Uuid, reader: Uuid, at: DateTime<Utc>) -> Result<usize>;
    async fn set_chat_status(&self, donation_id: Uuid, status: ChatStatus) -> Result<()>;
    async fn list_chats(&self, filter: ChatFilter) -> Result<Vec<ChatRoom>>;

    async fn insert_notification(&self, notification: &Notification) -> Result<()>;
    /// Flips the delivery flag of every channel that succeeded.
    async fn record_delivery(&self, id: Uuid, outcomes: &[ChannelOutcome<'_>]) -> Result<()>;
    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>>;
    async fn list_notifications(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>>;
    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<MarkRead>;
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<usize>;
    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<i64>;

    /// Inserts or reactivates the (user, token) pair.
    async fn upsert_device_token(&self, user_id: Uuid, token: &str, platform: Platform) -> Result<DeviceToken>;
    async fn deactivate_device_token(&self, user_id: Uuid, token: &str) -> Result<usize>;
}
