//! Who may see and discuss a donation.
//!
//! Chat authorization, roster seeding and notification recipients all go
//! through this module; nothing else derives participation from a donation.

use uuid::Uuid;

use crate::types::{Actor, Donation, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedParticipant {
    pub user_id: Uuid,
    pub role: Role,
}

/// The donor, followed by the accepting organization once there is one.
/// Administrators are never part of the resolved set.
pub fn resolve(donation: &Donation) -> Vec<ResolvedParticipant> {
    let mut participants = vec![ResolvedParticipant {
        user_id: donation.donor_id,
        role: Role::Donor,
    }];

    if let Some(accepted_by) = &donation.accepted_by {
        if accepted_by.id != donation.donor_id {
            participants.push(ResolvedParticipant {
                user_id: accepted_by.id,
                role: Role::Organization,
            });
        }
    }

    participants
}

pub fn is_participant(donation: &Donation, user_id: Uuid) -> bool {
    resolve(donation).iter().any(|p| p.user_id == user_id)
}

/// Participants plus any administrator.
pub fn can_access(donation: &Donation, actor: &Actor) -> bool {
    actor.is_admin() || is_participant(donation, actor.id)
}

/// The resolved participants on the other side of an action taken by `actor_role`.
pub fn counterparts(donation: &Donation, actor_role: Role) -> Vec<Uuid> {
    resolve(donation)
        .into_iter()
        .filter(|p| p.role != actor_role)
        .map(|p| p.user_id)
        .collect()
}
