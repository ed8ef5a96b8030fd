//! Role-gated custody transitions of a donation.
//!
//! `apply` is pure: it validates an event against a snapshot and returns the
//! next snapshot. Persisting it (conditionally on the pre-state) is the
//! caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, HarvestResult};
use crate::types::{AcceptedBy, Actor, Donation, DonationStatus, Role};

pub const DEFAULT_REJECTION_NOTE: &str = "Rejected by organization";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DonationEvent {
    Accept,
    Transit,
    Pickup,
    Reject { notes: Option<String> },
    Cancel,
}

impl DonationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DonationEvent::Accept => "accept",
            DonationEvent::Transit => "transit",
            DonationEvent::Pickup => "pickup",
            DonationEvent::Reject { .. } => "reject",
            DonationEvent::Cancel => "cancel",
        }
    }

    fn required_role(&self) -> Role {
        match self {
            DonationEvent::Cancel => Role::Donor,
            _ => Role::Organization,
        }
    }

    /// Statuses from which the event is legal.
    pub fn sources(&self) -> &'static [DonationStatus] {
        match self {
            DonationEvent::Accept | DonationEvent::Reject { .. } | DonationEvent::Cancel => {
                &[DonationStatus::Pending]
            }
            DonationEvent::Transit => &[DonationStatus::Accepted],
            DonationEvent::Pickup => &[DonationStatus::Accepted, DonationStatus::InTransit],
        }
    }

    pub fn target(&self) -> DonationStatus {
        match self {
            DonationEvent::Accept => DonationStatus::Accepted,
            DonationEvent::Transit => DonationStatus::InTransit,
            DonationEvent::Pickup => DonationStatus::PickedUp,
            DonationEvent::Reject { .. } => DonationStatus::Rejected,
            DonationEvent::Cancel => DonationStatus::Cancelled,
        }
    }
}

/// A validated transition: the status it was computed from and the next snapshot.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: DonationStatus,
    pub donation: Donation,
}

pub fn apply(
    donation: &Donation,
    actor: &Actor,
    event: DonationEvent,
    now: DateTime<Utc>,
) -> HarvestResult<Transition> {
    if actor.role != event.required_role() {
        return Err(HarvestError::forbidden(format!(
            "only a {} may {} a donation",
            event.required_role(),
            event.name()
        )));
    }

    match event {
        DonationEvent::Transit | DonationEvent::Pickup => {
            let is_acceptor = donation
                .accepted_by
                .as_ref()
                .map(|a| a.id == actor.id)
                .unwrap_or(false);
            if !is_acceptor {
                return Err(HarvestError::forbidden(format!(
                    "only the accepting organization may {} this donation",
                    event.name()
                )));
            }
        }
        DonationEvent::Cancel if donation.donor_id != actor.id => {
            return Err(HarvestError::forbidden(
                "only the donor may cancel this donation",
            ));
        }
        _ => {}
    }

    if !event.sources().contains(&donation.status) {
        return Err(HarvestError::InvalidTransition {
            event: event.name(),
            status: donation.status,
        });
    }

    let mut next = donation.clone();
    next.status = event.target();
    next.updated_at = now;

    match event {
        DonationEvent::Accept => {
            next.accepted_by = Some(AcceptedBy {
                id: actor.id,
                name: actor.name.clone(),
            });
        }
        DonationEvent::Pickup => {
            next.pickup_time = Some(now);
        }
        DonationEvent::Reject { notes } => {
            next.notes = Some(
                notes
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_REJECTION_NOTE.to_string()),
            );
        }
        DonationEvent::Transit | DonationEvent::Cancel => {}
    }

    Ok(Transition {
        from: donation.status,
        donation: next,
    })
}

/// `acceptedBy` present iff the donation went through acceptance;
/// `pickupTime` present iff picked up.
pub fn invariants_hold(donation: &Donation) -> bool {
    let accepted_ok = match donation.status {
        DonationStatus::Accepted | DonationStatus::InTransit | DonationStatus::PickedUp => {
            donation.accepted_by.is_some()
        }
        DonationStatus::Pending | DonationStatus::Rejected => donation.accepted_by.is_none(),
        DonationStatus::Cancelled | DonationStatus::Expired => true,
    };
    let pickup_ok = donation.pickup_time.is_some() == (donation.status == DonationStatus::PickedUp);
    accepted_ok && pickup_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, Location, NewDonation};
    use chrono::Duration;
    use uuid::Uuid;

    fn donor() -> Actor {
        Actor::new(Uuid::new_v4(), "Dana", Role::Donor)
    }

    fn org(name: &str) -> Actor {
        Actor::new(Uuid::new_v4(), name, Role::Organization)
    }

    fn pending(donor: &Actor) -> Donation {
        Donation::from_new(
            donor,
            NewDonation {
                food_name: "Soup".into(),
                quantity: "12 litres".into(),
                description: None,
                expiry_time: Utc::now() + Duration::hours(10),
                image: None,
                location: Location {
                    address: Some("1 Main St".into()),
                    coordinates: Coordinates { lat: 1.0, lng: 2.0 },
                },
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_accept_sets_accepted_by() {
        let d = pending(&donor());
        let a = org("Food Bank A");
        let t = apply(&d, &a, DonationEvent::Accept, Utc::now()).unwrap();

        assert_eq!(t.from, DonationStatus::Pending);
        assert_eq!(t.donation.status, DonationStatus::Accepted);
        assert_eq!(t.donation.accepted_by.as_ref().unwrap().id, a.id);
        assert!(invariants_hold(&t.donation));
    }

    #[test]
    fn test_second_accept_is_invalid_transition() {
        let d = pending(&donor());
        let accepted = apply(&d, &org("A"), DonationEvent::Accept, Utc::now())
            .unwrap()
            .donation;

        let err = apply(&accepted, &org("B"), DonationEvent::Accept, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            HarvestError::InvalidTransition { event: "accept", status: DonationStatus::Accepted }
        ));
    }

    #[test]
    fn test_pickup_by_other_organization_is_forbidden() {
        let d = pending(&donor());
        let accepted = apply(&d, &org("A"), DonationEvent::Accept, Utc::now())
            .unwrap()
            .donation;

        let err = apply(&accepted, &org("B"), DonationEvent::Pickup, Utc::now()).unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));
        assert_eq!(accepted.status, DonationStatus::Accepted);
    }

    #[test]
    fn test_full_custody_path() {
        let d = pending(&donor());
        let a = org("A");
        let now = Utc::now();
        let accepted = apply(&d, &a, DonationEvent::Accept, now).unwrap().donation;
        let moving = apply(&accepted, &a, DonationEvent::Transit, now).unwrap().donation;
        assert_eq!(moving.status, DonationStatus::InTransit);
        assert!(moving.pickup_time.is_none());

        let done = apply(&moving, &a, DonationEvent::Pickup, now).unwrap().donation;
        assert_eq!(done.status, DonationStatus::PickedUp);
        assert_eq!(done.pickup_time, Some(now));
        assert!(invariants_hold(&done));

        let err = apply(&done, &a, DonationEvent::Transit, now).unwrap_err();
        assert!(matches!(err, HarvestError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pickup_straight_from_accepted() {
        let d = pending(&donor());
        let a = org("A");
        let accepted = apply(&d, &a, DonationEvent::Accept, Utc::now()).unwrap().donation;
        let done = apply(&accepted, &a, DonationEvent::Pickup, Utc::now()).unwrap();
        assert_eq!(done.from, DonationStatus::Accepted);
        assert_eq!(done.donation.status, DonationStatus::PickedUp);
    }

    #[test]
    fn test_reject_defaults_note() {
        let d = pending(&donor());
        let rejected = apply(&d, &org("A"), DonationEvent::Reject { notes: None }, Utc::now())
            .unwrap()
            .donation;
        assert_eq!(rejected.status, DonationStatus::Rejected);
        assert_eq!(rejected.notes.as_deref(), Some(DEFAULT_REJECTION_NOTE));
        assert!(rejected.accepted_by.is_none());

        let noted = apply(
            &d,
            &org("A"),
            DonationEvent::Reject { notes: Some("Too far".into()) },
            Utc::now(),
        )
        .unwrap()
        .donation;
        assert_eq!(noted.notes.as_deref(), Some("Too far"));
    }

    #[test]
    fn test_cancel_requires_owner_and_pending() {
        let owner = donor();
        let d = pending(&owner);

        let err = apply(&d, &donor(), DonationEvent::Cancel, Utc::now()).unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));

        let cancelled = apply(&d, &owner, DonationEvent::Cancel, Utc::now()).unwrap().donation;
        assert_eq!(cancelled.status, DonationStatus::Cancelled);

        let accepted = apply(&d, &org("A"), DonationEvent::Accept, Utc::now()).unwrap().donation;
        let err = apply(&accepted, &owner, DonationEvent::Cancel, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            HarvestError::InvalidTransition { event: "cancel", status: DonationStatus::Accepted }
        ));
    }

    #[test]
    fn test_wrong_role_is_forbidden() {
        let owner = donor();
        let d = pending(&owner);
        let err = apply(&d, &owner, DonationEvent::Accept, Utc::now()).unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));

        let admin = Actor::new(Uuid::new_v4(), "Ada", Role::Admin);
        let err = apply(&d, &admin, DonationEvent::Cancel, Utc::now()).unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));
    }

    #[test]
    fn test_only_table_edges_are_legal() {
        let all = [
            DonationStatus::Pending,
            DonationStatus::Accepted,
            DonationStatus::InTransit,
            DonationStatus::PickedUp,
            DonationStatus::Rejected,
            DonationStatus::Cancelled,
            DonationStatus::Expired,
        ];
        let owner = donor();
        let a = org("A");

        for status in all {
            let mut d = pending(&owner);
            d.status = status;
            // keep ownership checks satisfied so only the status guard decides
            d.accepted_by = Some(AcceptedBy { id: a.id, name: a.name.clone() });

            let events = [
                (DonationEvent::Accept, &a),
                (DonationEvent::Transit, &a),
                (DonationEvent::Pickup, &a),
                (DonationEvent::Reject { notes: None }, &a),
                (DonationEvent::Cancel, &owner),
            ];
            for (event, actor) in events {
                let legal = event.sources().contains(&status);
                let result = apply(&d, actor, event.clone(), Utc::now());
                match result {
                    Ok(t) => {
                        assert!(legal, "{:?} from {:?} should fail", event, status);
                        assert_eq!(t.donation.status, event.target());
                    }
                    Err(e) => {
                        assert!(!legal, "{:?} from {:?} should succeed: {}", event, status, e);
                        assert!(matches!(e, HarvestError::InvalidTransition { .. }));
                    }
                }
            }
        }
    }
}
