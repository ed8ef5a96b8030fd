//! Donation commands. Every status change re-reads the donation, validates it
//! through the lifecycle rules and writes it back only if the stored status
//! is still the one the rules saw.

use chrono::Utc;
use harvest_chat::ChatService;
use harvest_core::error::{HarvestError, HarvestResult};
use harvest_core::events::{EventSink, LifecycleEvent, NotifyEvent};
use harvest_core::lifecycle::{self, DonationEvent};
use harvest_core::participants;
use harvest_core::store::{DonationFilter, Store};
use harvest_core::types::{Actor, Donation, DonationStatus, NewDonation, Role};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct DonationService {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    chat: ChatService,
}

impl DonationService {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>, chat: ChatService) -> Self {
        Self { store, events, chat }
    }

    async fn load(&self, id: Uuid) -> HarvestResult<Donation> {
        self.store
            .get_donation(id)
            .await?
            .ok_or_else(|| HarvestError::not_found("donation", id))
    }

    pub async fn create(&self, actor: &Actor, new: NewDonation) -> HarvestResult<Donation> {
        if actor.role != Role::Donor {
            return Err(HarvestError::forbidden("only donors may create donations"));
        }
        let now = Utc::now();
        validate(&new, now)?;

        let donation = Donation::from_new(actor, new, now);
        self.store.insert_donation(&donation).await?;
        tracing::info!("Donation {} created by {}", donation.id, actor.id);

        self.events.emit(NotifyEvent::DonationCreated(donation.clone()));
        Ok(donation)
    }

    /// Organizations see pending donations plus the ones they accepted,
    /// donors their own, administrators everything.
    pub async fn list(&self, actor: &Actor) -> HarvestResult<Vec<Donation>> {
        let filter = match actor.role {
            Role::Admin => DonationFilter::All,
            Role::Organization => DonationFilter::VisibleToOrganization(actor.id),
            Role::Donor => DonationFilter::Donor(actor.id),
        };
        Ok(self.store.list_donations(filter).await?)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> HarvestResult<Donation> {
        let donation = self.load(id).await?;
        let open_offer = actor.role == Role::Organization && donation.status == DonationStatus::Pending;
        if !open_offer && !participants::can_access(&donation, actor) {
            return Err(HarvestError::forbidden("not authorized to view this donation"));
        }
        Ok(donation)
    }

    pub async fn accept(&self, actor: &Actor, id: Uuid) -> HarvestResult<Donation> {
        self.transition(actor, id, DonationEvent::Accept).await
    }

    pub async fn transit(&self, actor: &Actor, id: Uuid) -> HarvestResult<Donation> {
        self.transition(actor, id, DonationEvent::Transit).await
    }

    pub async fn pickup(&self, actor: &Actor, id: Uuid) -> HarvestResult<Donation> {
        self.transition(actor, id, DonationEvent::Pickup).await
    }

    pub async fn reject(&self, actor: &Actor, id: Uuid, notes: Option<String>) -> HarvestResult<Donation> {
        self.transition(actor, id, DonationEvent::Reject { notes }).await
    }

    pub async fn cancel(&self, actor: &Actor, id: Uuid) -> HarvestResult<Donation> {
        self.transition(actor, id, DonationEvent::Cancel).await
    }

    async fn transition(&self, actor: &Actor, id: Uuid, event: DonationEvent) -> HarvestResult<Donation> {
        let current = self.load(id).await?;
        let name = event.name();
        let next = lifecycle::apply(&current, actor, event, Utc::now())?;

        if !self.store.update_donation_if(&next.donation, next.from).await? {
            tracing::warn!("Lost {} race on donation {} (expected {})", name, id, next.from);
            return Err(HarvestError::StoreConflict { id });
        }
        let donation = next.donation;
        tracing::info!("Donation {} {} -> {} by {}", id, next.from, donation.status, actor.id);

        self.events.emit(NotifyEvent::Lifecycle(LifecycleEvent {
            donation_id: id,
            previous_status: next.from,
            new_status: donation.status,
            actor_role: actor.role,
            donation: donation.clone(),
        }));

        if donation.status == DonationStatus::Accepted {
            if let Err(e) = self.chat.sync_roster(&donation).await {
                tracing::warn!("Failed to add acceptor to chat for donation {}: {}", id, e);
            }
        }

        if donation.status.is_terminal() {
            if let Err(e) = self.chat.close_for_donation(id).await {
                tracing::warn!("Failed to close chat for donation {}: {}", id, e);
            }
        }

        Ok(donation)
    }
}

fn validate(new: &NewDonation, now: chrono::DateTime<Utc>) -> HarvestResult<()> {
    if new.food_name.trim().is_empty() {
        return Err(HarvestError::Validation("food name is required".into()));
    }
    if new.quantity.trim().is_empty() {
        return Err(HarvestError::Validation("quantity is required".into()));
    }
    if new.expiry_time <= now {
        return Err(HarvestError::Validation("expiry time must be in the future".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use harvest_chat::MemoryRoomHub;
    use harvest_core::events::RecordingSink;
    use harvest_core::store::MemoryStore;
    use harvest_core::types::{ChatStatus, Coordinates, Location};

    struct Fixture {
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        chat: ChatService,
        donations: DonationService,
        donor: Actor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let chat = ChatService::new(store.clone(), Arc::new(MemoryRoomHub::new()));
        let donations = DonationService::new(store.clone(), sink.clone(), chat.clone());
        Fixture {
            store,
            sink,
            chat,
            donations,
            donor: Actor::new(Uuid::new_v4(), "Corner Bakery", Role::Donor),
        }
    }

    fn org(name: &str) -> Actor {
        Actor::new(Uuid::new_v4(), name, Role::Organization)
    }

    fn offer(hours: i64) -> NewDonation {
        NewDonation {
            food_name: "Bagels".into(),
            quantity: "3 dozen".into(),
            description: Some("day old".into()),
            expiry_time: Utc::now() + Duration::hours(hours),
            image: None,
            location: Location {
                address: Some("12 High St".into()),
                coordinates: Coordinates { lat: 51.5, lng: -0.1 },
            },
        }
    }

    #[tokio::test]
    async fn test_create_validates_and_emits() {
        let f = fixture();
        let err = f.donations.create(&org("A"), offer(4)).await.unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));

        let err = f.donations.create(&f.donor, offer(-1)).await.unwrap_err();
        assert!(matches!(err, HarvestError::Validation(_)));

        let mut blank = offer(4);
        blank.food_name = "  ".into();
        assert!(matches!(
            f.donations.create(&f.donor, blank).await.unwrap_err(),
            HarvestError::Validation(_)
        ));

        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        assert_eq!(d.status, DonationStatus::Pending);
        assert_eq!(d.donor_name, "Corner Bakery");

        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], NotifyEvent::DonationCreated(e) if e.id == d.id));
    }

    #[tokio::test]
    async fn test_second_accept_is_rejected() {
        let f = fixture();
        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let (a, b) = (org("A"), org("B"));

        let accepted = f.donations.accept(&a, d.id).await.unwrap();
        assert_eq!(accepted.accepted_by.as_ref().map(|x| x.id), Some(a.id));

        let err = f.donations.accept(&b, d.id).await.unwrap_err();
        assert!(matches!(
            err,
            HarvestError::InvalidTransition { event: "accept", status: DonationStatus::Accepted }
        ));
        let stored = f.store.get_donation(d.id).await.unwrap().unwrap();
        assert_eq!(stored.accepted_by.map(|x| x.id), Some(a.id));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_have_one_winner() {
        let f = fixture();
        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let (a, b) = (org("A"), org("B"));

        let (ra, rb) = futures::join!(f.donations.accept(&a, d.id), f.donations.accept(&b, d.id));
        let winners = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);

        let loser = if ra.is_ok() { rb.unwrap_err() } else { ra.unwrap_err() };
        assert!(matches!(
            loser,
            HarvestError::InvalidTransition { .. } | HarvestError::StoreConflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_pickup_by_other_org_is_forbidden() {
        let f = fixture();
        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let (a, b) = (org("A"), org("B"));
        f.donations.accept(&a, d.id).await.unwrap();

        let err = f.donations.pickup(&b, d.id).await.unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));
        let stored = f.store.get_donation(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DonationStatus::Accepted);
    }

    #[tokio::test]
    async fn test_lifecycle_events_and_chat_closing() {
        let f = fixture();
        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let a = org("A");
        f.donations.accept(&a, d.id).await.unwrap();
        let room = f.chat.open_for_donation(&f.donor, d.id).await.unwrap();
        f.donations.transit(&a, d.id).await.unwrap();
        let done = f.donations.pickup(&a, d.id).await.unwrap();
        assert!(done.pickup_time.is_some());

        let statuses: Vec<(DonationStatus, DonationStatus, Role)> = f
            .sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                NotifyEvent::Lifecycle(l) => Some((l.previous_status, l.new_status, l.actor_role)),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                (DonationStatus::Pending, DonationStatus::Accepted, Role::Organization),
                (DonationStatus::Accepted, DonationStatus::InTransit, Role::Organization),
                (DonationStatus::InTransit, DonationStatus::PickedUp, Role::Organization),
            ]
        );

        let room = f.store.get_chat(room.id).await.unwrap().unwrap();
        assert_eq!(room.status, ChatStatus::Closed);
    }

    #[tokio::test]
    async fn test_accept_adds_organization_to_open_chat() {
        let f = fixture();
        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let room = f.chat.open_for_donation(&f.donor, d.id).await.unwrap();
        assert_eq!(room.participants.len(), 1);

        let a = org("A");
        f.donations.accept(&a, d.id).await.unwrap();

        let room = f.store.get_chat(room.id).await.unwrap().unwrap();
        assert!(room.has_participant(f.donor.id));
        assert!(room.has_participant(a.id));
        let chats = f.chat.my_chats(&a).await.unwrap();
        assert_eq!(chats.iter().map(|c| c.id).collect::<Vec<_>>(), vec![room.id]);
    }

    #[tokio::test]
    async fn test_failed_transition_emits_nothing() {
        let f = fixture();
        let d = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let before = f.sink.events().len();

        let stranger = Actor::new(Uuid::new_v4(), "Other Donor", Role::Donor);
        assert!(f.donations.cancel(&stranger, d.id).await.is_err());
        assert!(f.donations.transit(&org("A"), d.id).await.is_err());
        assert_eq!(f.sink.events().len(), before);

        let cancelled = f.donations.cancel(&f.donor, d.id).await.unwrap();
        assert_eq!(cancelled.status, DonationStatus::Cancelled);
        assert_eq!(f.sink.events().len(), before + 1);
    }

    #[tokio::test]
    async fn test_visibility_by_role() {
        let f = fixture();
        let d1 = f.donations.create(&f.donor, offer(4)).await.unwrap();
        let d2 = f.donations.create(&f.donor, offer(6)).await.unwrap();
        let (a, b) = (org("A"), org("B"));
        f.donations.accept(&a, d1.id).await.unwrap();

        let for_b = f.donations.list(&b).await.unwrap();
        assert_eq!(for_b.iter().map(|d| d.id).collect::<Vec<_>>(), vec![d2.id]);
        let for_a = f.donations.list(&a).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(f.donations.list(&f.donor).await.unwrap().len(), 2);

        assert!(f.donations.get(&b, d2.id).await.is_ok());
        assert!(matches!(
            f.donations.get(&b, d1.id).await.unwrap_err(),
            HarvestError::Forbidden(_)
        ));
        let other_donor = Actor::new(Uuid::new_v4(), "X", Role::Donor);
        assert!(f.donations.get(&other_donor, d1.id).await.is_err());
        let admin = Actor::new(Uuid::new_v4(), "Ada", Role::Admin);
        assert_eq!(f.donations.list(&admin).await.unwrap().len(), 2);
        assert!(matches!(
            f.donations.get(&admin, Uuid::new_v4()).await.unwrap_err(),
            HarvestError::NotFound { .. }
        ));
    }
}
