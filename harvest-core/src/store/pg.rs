use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{ChannelOutcome, ChatFilter, DonationFilter, MarkRead, Store};
use crate::db::DbPool;
use crate::schema::{
    chat_messages, chat_participants, chats, device_tokens, donations, message_reads,
    notifications, users,
};
use crate::types::{
    AcceptedBy, ChatMessage, ChatRoom, ChatStatus, ContactProfile, Coordinates, DeviceToken,
    Donation, DonationStatus, Location, Notification, Participant, Platform, ReadReceipt, Role,
    Stats, User,
};

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    organization: Option<String>,
    verified: bool,
    created_at: DateTime<Utc>,
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        UserRow {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role.as_str().to_string(),
            organization: u.organization.clone(),
            verified: u.verified,
            created_at: u.created_at,
        }
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            role: row.role.parse()?,
            organization: row.organization,
            verified: row.verified,
            created_at: row.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = donations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct DonationRow {
    id: Uuid,
    donor_id: Uuid,
    donor_name: String,
    food_name: String,
    quantity: String,
    description: Option<String>,
    expiry_time: DateTime<Utc>,
    image: Option<String>,
    address: Option<String>,
    latitude: f64,
    longitude: f64,
    status: String,
    accepted_by_id: Option<Uuid>,
    accepted_by_name: Option<String>,
    pickup_time: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Donation> for DonationRow {
    fn from(d: &Donation) -> Self {
        DonationRow {
            id: d.id,
            donor_id: d.donor_id,
            donor_name: d.donor_name.clone(),
            food_name: d.food_name.clone(),
            quantity: d.quantity.clone(),
            description: d.description.clone(),
            expiry_time: d.expiry_time,
            image: d.image.clone(),
            address: d.location.address.clone(),
            latitude: d.location.coordinates.lat,
            longitude: d.location.coordinates.lng,
            status: d.status.as_str().to_string(),
            accepted_by_id: d.accepted_by.as_ref().map(|a| a.id),
            accepted_by_name: d.accepted_by.as_ref().map(|a| a.name.clone()),
            pickup_time: d.pickup_time,
            notes: d.notes.clone(),
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

impl TryFrom<DonationRow> for Donation {
    type Error = anyhow::Error;

    fn try_from(row: DonationRow) -> Result<Self> {
        let accepted_by = match (row.accepted_by_id, row.accepted_by_name) {
            (Some(id), name) => Some(AcceptedBy {
                id,
                name: name.unwrap_or_default(),
            }),
            (None, _) => None,
        };
        Ok(Donation {
            id: row.id,
            donor_id: row.donor_id,
            donor_name: row.donor_name,
            food_name: row.food_name,
            quantity: row.quantity,
            description: row.description,
            expiry_time: row.expiry_time,
            image: row.image,
            location: Location {
                address: row.address,
                coordinates: Coordinates {
                    lat: row.latitude,
                    lng: row.longitude,
                },
            },
            status: row.status.parse()?,
            accepted_by,
            pickup_time: row.pickup_time,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = chats)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ChatRow {
    id: Uuid,
    donation_id: Uuid,
    status: String,
    last_activity: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = chat_participants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ParticipantRow {
    chat_id: Uuid,
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = chat_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    sender_name: String,
    sender_role: String,
    body: String,
    sent_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = chat_messages)]
struct NewMessageRow<'a> {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    sender_name: &'a str,
    sender_role: &'a str,
    body: &'a str,
    sent_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = message_reads)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ReadRow {
    message_id: Uuid,
    user_id: Uuid,
    read_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    body: String,
    kind: String,
    donation_id: Option<Uuid>,
    read: bool,
    email_sent: bool,
    push_sent: bool,
    created_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationRow {
    fn from(n: &Notification) -> Self {
        NotificationRow {
            id: n.id,
            user_id: n.user_id,
            title: n.title.clone(),
            body: n.message.clone(),
            kind: n.kind.as_str().to_string(),
            donation_id: n.donation_id,
            read: n.read,
            email_sent: n.email_sent,
            push_sent: n.push_sent,
            created_at: n.created_at,
        }
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            message: row.body,
            kind: row.kind.parse()?,
            donation_id: row.donation_id,
            read: row.read,
            email_sent: row.email_sent,
            push_sent: row.push_sent,
            created_at: row.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = device_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct DeviceTokenRow {
    id: Uuid,
    user_id: Uuid,
    token: String,
    platform: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeviceTokenRow> for DeviceToken {
    type Error = anyhow::Error;

    fn try_from(row: DeviceTokenRow) -> Result<Self> {
        Ok(DeviceToken {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            platform: row.platform.parse()?,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// PostgreSQL-backed store over the shared diesel-async pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Loads rosters, messages and receipts for the given chat rows.
    async fn hydrate_chats(&self, rows: Vec<ChatRow>) -> Result<Vec<ChatRoom>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let chat_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let participant_rows: Vec<ParticipantRow> = chat_participants::table
            .filter(chat_participants::chat_id.eq_any(&chat_ids))
            .order(chat_participants::joined_at.asc())
            .select(ParticipantRow::as_select())
            .load(&mut conn)
            .await?;

        let message_rows: Vec<MessageRow> = chat_messages::table
            .filter(chat_messages::chat_id.eq_any(&chat_ids))
            .order(chat_messages::seq.asc())
            .select(MessageRow::as_select())
            .load(&mut conn)
            .await?;

        let message_ids: Vec<Uuid> = message_rows.iter().map(|m| m.id).collect();
        let read_rows: Vec<ReadRow> = if message_ids.is_empty() {
            Vec::new()
        } else {
            message_reads::table
                .filter(message_reads::message_id.eq_any(&message_ids))
                .order(message_reads::read_at.asc())
                .select(ReadRow::as_select())
                .load(&mut conn)
                .await?
        };

        let mut receipts: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for r in read_rows {
            receipts.entry(r.message_id).or_default().push(ReadReceipt {
                user_id: r.user_id,
                read_at: r.read_at,
            });
        }

        let mut participants: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for p in participant_rows {
            participants.entry(p.chat_id).or_default().push(Participant {
                user_id: p.user_id,
                role: p.role.parse()?,
                joined_at: p.joined_at,
            });
        }

        let mut messages: HashMap<Uuid, Vec<ChatMessage>> = HashMap::new();
        for m in message_rows {
            messages.entry(m.chat_id).or_default().push(ChatMessage {
                id: m.id,
                sender_id: m.sender_id,
                sender_name: m.sender_name,
                sender_role: m.sender_role.parse()?,
                message: m.body,
                timestamp: m.sent_at,
                read: receipts.remove(&m.id).unwrap_or_default(),
            });
        }

        rows.into_iter()
            .map(|row| {
                Ok(ChatRoom {
                    id: row.id,
                    donation_id: row.donation_id,
                    participants: participants.remove(&row.id).unwrap_or_default(),
                    messages: messages.remove(&row.id).unwrap_or_default(),
                    status: row.status.parse()?,
                    last_activity: row.last_activity,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn load_chat_row(&self, row: Option<ChatRow>) -> Result<Option<ChatRoom>> {
        match row {
            Some(row) => Ok(self.hydrate_chats(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(users::table)
            .values(UserRow::from(user))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let mut conn = self.pool.get().await?;
        let row: Option<UserRow> = users::table
            .find(id)
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<UserRow> = users::table
            .order(users::created_at.desc())
            .select(UserRow::as_select())
            .load(&mut conn)
            .await?;
        convert_all(rows)
    }

    async fn set_user_verified(&self, id: Uuid, verified: bool) -> Result<Option<User>> {
        let mut conn = self.pool.get().await?;
        let row: Option<UserRow> = diesel::update(users::table.find(id))
            .set(users::verified.eq(verified))
            .returning(UserRow::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        row.map(User::try_from).transpose()
    }

    async fn verified_organizations(&self) -> Result<Vec<User>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<UserRow> = users::table
            .filter(users::role.eq(Role::Organization.as_str()))
            .filter(users::verified.eq(true))
            .order(users::created_at.desc())
            .select(UserRow::as_select())
            .load(&mut conn)
            .await?;
        convert_all(rows)
    }

    async fn contact_profile(&self, user_id: Uuid) -> Result<Option<ContactProfile>> {
        let mut conn = self.pool.get().await?;
        let email: Option<String> = users::table
            .find(user_id)
            .select(users::email)
            .first(&mut conn)
            .await
            .optional()?;
        let Some(email) = email else {
            return Ok(None);
        };

        let rows: Vec<DeviceTokenRow> = device_tokens::table
            .filter(device_tokens::user_id.eq(user_id))
            .filter(device_tokens::active.eq(true))
            .order(device_tokens::created_at.desc())
            .select(DeviceTokenRow::as_select())
            .load(&mut conn)
            .await?;

        Ok(Some(ContactProfile {
            user_id,
            email,
            devices: convert_all(rows)?,
        }))
    }

    async fn insert_donation(&self, donation: &Donation) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(donations::table)
            .values(DonationRow::from(donation))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_donation(&self, id: Uuid) -> Result<Option<Donation>> {
        let mut conn = self.pool.get().await?;
        let row: Option<DonationRow> = donations::table
            .find(id)
            .select(DonationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Donation::try_from).transpose()
    }

    async fn list_donations(&self, filter: DonationFilter) -> Result<Vec<Donation>> {
        let mut conn = self.pool.get().await?;
        let mut query = donations::table
            .order(donations::created_at.desc())
            .select(DonationRow::as_select())
            .into_boxed();

        match filter {
            DonationFilter::All => {}
            DonationFilter::Donor(donor_id) => {
                query = query.filter(donations::donor_id.eq(donor_id));
            }
            DonationFilter::VisibleToOrganization(org_id) => {
                query = query.filter(
                    donations::status
                        .eq(DonationStatus::Pending.as_str())
                        .or(donations::accepted_by_id.eq(org_id)),
                );
            }
        }

        let rows: Vec<DonationRow> = query.load(&mut conn).await?;
        convert_all(rows)
    }

    async fn update_donation_if(&self, donation: &Donation, expected: DonationStatus) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let row = DonationRow::from(donation);
        let affected = diesel::update(
            donations::table
                .filter(donations::id.eq(donation.id))
                .filter(donations::status.eq(expected.as_str())),
        )
        .set(&row)
        .execute(&mut conn)
        .await?;
        Ok(affected == 1)
    }

    async fn expiring_donations(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        statuses: &[DonationStatus],
    ) -> Result<Vec<Donation>> {
        let mut conn = self.pool.get().await?;
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows: Vec<DonationRow> = donations::table
            .filter(donations::expiry_time.gt(after))
            .filter(donations::expiry_time.le(until))
            .filter(donations::status.eq_any(statuses))
            .order(donations::created_at.desc())
            .select(DonationRow::as_select())
            .load(&mut conn)
            .await?;
        convert_all(rows)
    }

    async fn stats(&self) -> Result<Stats> {
        let mut conn = self.pool.get().await?;
        let by_role: Vec<(String, i64)> = users::table
            .group_by(users::role)
            .select((users::role, count_star()))
            .load(&mut conn)
            .await?;
        let by_verified: Vec<(bool, i64)> = users::table
            .group_by(users::verified)
            .select((users::verified, count_star()))
            .load(&mut conn)
            .await?;
        let by_status: Vec<(String, i64)> = donations::table
            .group_by(donations::status)
            .select((donations::status, count_star()))
            .load(&mut conn)
            .await?;

        let mut stats = Stats::default();
        for (role, count) in by_role {
            stats.users.total += count;
            match role.parse::<Role>() {
                Ok(Role::Donor) => stats.users.donors += count,
                Ok(Role::Organization) => stats.users.ngos += count,
                _ => {}
            }
        }
        for (verified, count) in by_verified {
            if verified {
                stats.users.verified += count;
            } else {
                stats.users.unverified += count;
            }
        }
        for (status, count) in by_status {
            stats.donations.total += count;
            match status.parse::<DonationStatus>() {
                Ok(DonationStatus::Pending) => stats.donations.pending += count,
                Ok(DonationStatus::Accepted) => stats.donations.accepted += count,
                Ok(DonationStatus::InTransit) => stats.donations.in_transit += count,
                Ok(DonationStatus::PickedUp) => stats.donations.picked_up += count,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn get_chat(&self, id: Uuid) -> Result<Option<ChatRoom>> {
        let row: Option<ChatRow> = {
            let mut conn = self.pool.get().await?;
            chats::table
                .find(id)
                .select(ChatRow::as_select())
                .first(&mut conn)
                .await
                .optional()?
        };
        self.load_chat_row(row).await
    }

    async fn get_chat_by_donation(&self, donation_id: Uuid) -> Result<Option<ChatRoom>> {
        let row: Option<ChatRow> = {
            let mut conn = self.pool.get().await?;
            chats::table
                .filter(chats::donation_id.eq(donation_id))
                .select(ChatRow::as_select())
                .first(&mut conn)
                .await
                .optional()?
        };
        self.load_chat_row(row).await
    }

    async fn create_chat(&self, room: &ChatRoom) -> Result<ChatRoom> {
        {
            let mut conn = self.pool.get().await?;
            let chat_row = ChatRow {
                id: room.id,
                donation_id: room.donation_id,
                status: room.status.as_str().to_string(),
                last_activity: room.last_activity,
                created_at: room.created_at,
            };
            let participant_rows: Vec<ParticipantRow> = room
                .participants
                .iter()
                .map(|p| ParticipantRow {
                    chat_id: room.id,
                    user_id: p.user_id,
                    role: p.role.as_str().to_string(),
                    joined_at: p.joined_at,
                })
                .collect();

            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let inserted = diesel::insert_into(chats::table)
                        .values(&chat_row)
                        .on_conflict(chats::donation_id)
                        .do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted == 1 && !participant_rows.is_empty() {
                        diesel::insert_into(chat_participants::table)
                            .values(&participant_rows)
                            .on_conflict_do_nothing()
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await?;
        }

        self.get_chat_by_donation(room.donation_id)
            .await?
            .ok_or_else(|| anyhow!("Chat for donation {} vanished after insert", room.donation_id))
    }

    async fn add_participant(&self, chat_id: Uuid, participant: &Participant) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let inserted = diesel::insert_into(chat_participants::table)
            .values(ParticipantRow {
                chat_id,
                user_id: participant.user_id,
                role: participant.role.as_str().to_string(),
                joined_at: participant.joined_at,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn append_message(&self, chat_id: Uuid, message: &ChatMessage) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let row = NewMessageRow {
            id: message.id,
            chat_id,
            sender_id: message.sender_id,
            sender_name: &message.sender_name,
            sender_role: message.sender_role.as_str(),
            body: &message.message,
            sent_at: message.timestamp,
        };
        let receipts: Vec<ReadRow> = message
            .read
            .iter()
            .map(|r| ReadRow {
                message_id: message.id,
                user_id: r.user_id,
                read_at: r.read_at,
            })
            .collect();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                diesel::insert_into(chat_messages::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                if !receipts.is_empty() {
                    diesel::insert_into(message_reads::table)
                        .values(&receipts)
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                }
                diesel::update(chats::table.find(chat_id))
                    .set(chats::last_activity.eq(message.timestamp))
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;
        Ok(())
    }

    async fn mark_messages_read(&self, chat_id: Uuid, reader: Uuid, at: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let unread: Vec<Uuid> = chat_messages::table
            .filter(chat_messages::chat_id.eq(chat_id))
            .filter(chat_messages::sender_id.ne(reader))
            .select(chat_messages::id)
            .load(&mut conn)
            .await?;
        if unread.is_empty() {
            return Ok(0);
        }

        let receipts: Vec<ReadRow> = unread
            .into_iter()
            .map(|message_id| ReadRow {
                message_id,
                user_id: reader,
                read_at: at,
            })
            .collect();
        let added = diesel::insert_into(message_reads::table)
            .values(&receipts)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(added)
    }

    async fn set_chat_status(&self, donation_id: Uuid, status: ChatStatus) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(chats::table.filter(chats::donation_id.eq(donation_id)))
            .set(chats::status.eq(status.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_chats(&self, filter: ChatFilter) -> Result<Vec<ChatRoom>> {
        let rows: Vec<ChatRow> = {
            let mut conn = self.pool.get().await?;
            let mut query = chats::table
                .order(chats::last_activity.desc())
                .select(ChatRow::as_select())
                .into_boxed();
            match filter {
                ChatFilter::Active => {
                    query = query.filter(chats::status.eq(ChatStatus::Active.as_str()));
                }
                ChatFilter::Participant(user_id) => {
                    let member_of = chat_participants::table
                        .filter(chat_participants::user_id.eq(user_id))
                        .select(chat_participants::chat_id);
                    query = query.filter(chats::id.eq_any(member_of));
                }
            }
            query.load(&mut conn).await?
        };
        self.hydrate_chats(rows).await
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notifications::table)
            .values(NotificationRow::from(notification))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn record_delivery(&self, id: Uuid, outcomes: &[ChannelOutcome<'_>]) -> Result<()> {
        let mut conn = self.pool.get().await?;
        for (channel, sent) in outcomes.iter().filter(|(_, sent)| *sent) {
            let target = notifications::table.find(id);
            match *channel {
                "email" => {
                    diesel::update(target)
                        .set(notifications::email_sent.eq(*sent))
                        .execute(&mut conn)
                        .await?;
                }
                "push" => {
                    diesel::update(target)
                        .set(notifications::push_sent.eq(*sent))
                        .execute(&mut conn)
                        .await?;
                }
                other => tracing::debug!("No delivery flag for channel {}", other),
            }
        }
        Ok(())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        let row: Option<NotificationRow> = notifications::table
            .find(id)
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Notification::try_from).transpose()
    }

    async fn list_notifications(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        convert_all(rows)
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<MarkRead> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::user_id.eq(user_id))
                .filter(notifications::read.eq(false)),
        )
        .set(notifications::read.eq(true))
        .execute(&mut conn)
        .await?;
        if updated == 1 {
            return Ok(MarkRead::Marked);
        }

        let exists: Option<Uuid> = notifications::table
            .filter(notifications::id.eq(id))
            .filter(notifications::user_id.eq(user_id))
            .select(notifications::id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(if exists.is_some() {
            MarkRead::AlreadyRead
        } else {
            MarkRead::NotFound
        })
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::user_id.eq(user_id))
                .filter(notifications::read.eq(false)),
        )
        .set(notifications::read.eq(true))
        .execute(&mut conn)
        .await?;
        Ok(updated)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let count = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::read.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }

    async fn upsert_device_token(&self, user_id: Uuid, token: &str, platform: Platform) -> Result<DeviceToken> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let row = DeviceTokenRow {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            platform: platform.as_str().to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        let stored: DeviceTokenRow = diesel::insert_into(device_tokens::table)
            .values(&row)
            .on_conflict((device_tokens::user_id, device_tokens::token))
            .do_update()
            .set((
                device_tokens::active.eq(true),
                device_tokens::platform.eq(platform.as_str()),
                device_tokens::updated_at.eq(now),
            ))
            .returning(DeviceTokenRow::as_returning())
            .get_result(&mut conn)
            .await?;
        DeviceToken::try_from(stored)
    }

    async fn deactivate_device_token(&self, user_id: Uuid, token: &str) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            device_tokens::table
                .filter(device_tokens::user_id.eq(user_id))
                .filter(device_tokens::token.eq(token))
                .filter(device_tokens::active.eq(true)),
        )
        .set((
            device_tokens::active.eq(false),
            device_tokens::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated)
    }
}
