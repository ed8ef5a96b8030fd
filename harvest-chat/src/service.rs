use chrono::Utc;
use harvest_core::error::{HarvestError, HarvestResult};
use harvest_core::participants;
use harvest_core::store::{ChatFilter, Store};
use harvest_core::types::{Actor, ChatMessage, ChatRoom, ChatStatus, Donation, Participant};
use std::sync::Arc;
use uuid::Uuid;

use crate::hub::{RoomTransport, ServerEvent, SessionId};

/// Chat rooms attached to donations. Access is decided from the donation's
/// current participants, not from the stored roster.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    transport: Arc<dyn RoomTransport>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn RoomTransport>) -> Self {
        Self { store, transport }
    }

    pub fn transport(&self) -> &Arc<dyn RoomTransport> {
        &self.transport
    }

    async fn load_donation(&self, id: Uuid) -> HarvestResult<Donation> {
        self.store
            .get_donation(id)
            .await?
            .ok_or_else(|| HarvestError::not_found("donation", id))
    }

    async fn load_room(&self, chat_id: Uuid) -> HarvestResult<ChatRoom> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| HarvestError::not_found("chat", chat_id))
    }

    /// Loads the room and checks `actor` may use it.
    async fn authorized_room(&self, actor: &Actor, chat_id: Uuid) -> HarvestResult<ChatRoom> {
        let room = self.load_room(chat_id).await?;
        let donation = self.load_donation(room.donation_id).await?;
        if !participants::can_access(&donation, actor) {
            return Err(HarvestError::forbidden("access denied to chat"));
        }
        Ok(room)
    }

    async fn ensure_on_roster(&self, room: ChatRoom, actor: &Actor) -> HarvestResult<ChatRoom> {
        if room.has_participant(actor.id) {
            return Ok(room);
        }
        let participant = Participant {
            user_id: actor.id,
            role: actor.role,
            joined_at: Utc::now(),
        };
        self.store.add_participant(room.id, &participant).await?;
        self.load_room(room.id).await
    }

    /// Gets or creates the donation's room, seeding the roster from the
    /// donation's participants.
    pub async fn open_for_donation(&self, actor: &Actor, donation_id: Uuid) -> HarvestResult<ChatRoom> {
        let donation = self.load_donation(donation_id).await?;
        if !participants::can_access(&donation, actor) {
            return Err(HarvestError::forbidden("not authorized to access this chat"));
        }

        let room = match self.store.get_chat_by_donation(donation_id).await? {
            Some(room) => room,
            None => {
                let now = Utc::now();
                let roster = participants::resolve(&donation)
                    .into_iter()
                    .map(|p| Participant {
                        user_id: p.user_id,
                        role: p.role,
                        joined_at: now,
                    })
                    .collect();
                let room = ChatRoom {
                    id: Uuid::new_v4(),
                    donation_id,
                    participants: roster,
                    messages: Vec::new(),
                    status: ChatStatus::Active,
                    last_activity: now,
                    created_at: now,
                };
                let stored = self.store.create_chat(&room).await?;
                tracing::info!("Opened chat {} for donation {}", stored.id, donation_id);
                stored
            }
        };

        self.ensure_on_roster(room, actor).await
    }

    /// Subscribes `session` to the room, adding the actor to the roster if
    /// they are not on it yet.
    pub async fn join(&self, actor: &Actor, session: SessionId, chat_id: Uuid) -> HarvestResult<ChatRoom> {
        let room = self.authorized_room(actor, chat_id).await?;
        let room = self.ensure_on_roster(room, actor).await?;
        self.transport.join(session, chat_id).await;
        tracing::debug!("{} joined chat {}", actor.name, chat_id);
        Ok(room)
    }

    /// Joins as moderator and tells everyone already in the room.
    pub async fn admin_join(&self, actor: &Actor, session: SessionId, chat_id: Uuid) -> HarvestResult<ChatRoom> {
        if !actor.is_admin() {
            return Err(HarvestError::forbidden("admin access required"));
        }
        let room = self.load_room(chat_id).await?;
        let room = self.ensure_on_roster(room, actor).await?;
        self.transport.join(session, chat_id).await;

        let event = ServerEvent::AdminJoined {
            admin_name: actor.name.clone(),
            message: format!("Admin {} joined the chat for moderation", actor.name),
        };
        self.transport.broadcast_except(chat_id, session, event).await;
        Ok(room)
    }

    /// Persists the message, then broadcasts it to the room.
    pub async fn send(&self, actor: &Actor, chat_id: Uuid, body: &str) -> HarvestResult<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(HarvestError::Validation("message cannot be empty".into()));
        }
        self.authorized_room(actor, chat_id).await?;

        let message = ChatMessage::authored_by(actor, body, Utc::now());
        self.store.append_message(chat_id, &message).await?;

        let delivered = self
            .transport
            .broadcast(
                chat_id,
                ServerEvent::NewMessage {
                    chat_id,
                    message: message.clone(),
                },
            )
            .await;
        tracing::debug!("Message {} in chat {} reached {} session(s)", message.id, chat_id, delivered);
        Ok(message)
    }

    pub async fn history(&self, actor: &Actor, chat_id: Uuid) -> HarvestResult<Vec<ChatMessage>> {
        Ok(self.authorized_room(actor, chat_id).await?.messages)
    }

    /// Returns how many receipts were added; zero on repeat calls.
    pub async fn mark_read(&self, actor: &Actor, chat_id: Uuid) -> HarvestResult<usize> {
        self.authorized_room(actor, chat_id).await?;
        Ok(self
            .store
            .mark_messages_read(chat_id, actor.id, Utc::now())
            .await?)
    }

    /// Administrators see every active room, everyone else the rooms they are on.
    pub async fn my_chats(&self, actor: &Actor) -> HarvestResult<Vec<ChatRoom>> {
        let filter = if actor.is_admin() {
            ChatFilter::Active
        } else {
            ChatFilter::Participant(actor.id)
        };
        Ok(self.store.list_chats(filter).await?)
    }

    /// Adds the donation's current participants to its room, if it has one.
    pub async fn sync_roster(&self, donation: &Donation) -> HarvestResult<()> {
        let Some(room) = self.store.get_chat_by_donation(donation.id).await? else {
            return Ok(());
        };
        let now = Utc::now();
        for resolved in participants::resolve(donation) {
            if room.has_participant(resolved.user_id) {
                continue;
            }
            let participant = Participant {
                user_id: resolved.user_id,
                role: resolved.role,
                joined_at: now,
            };
            self.store.add_participant(room.id, &participant).await?;
            tracing::debug!("Added {} to chat {}", resolved.user_id, room.id);
        }
        Ok(())
    }

    pub async fn close_for_donation(&self, donation_id: Uuid) -> HarvestResult<()> {
        self.store
            .set_chat_status(donation_id, ChatStatus::Closed)
            .await?;
        Ok(())
    }
}
