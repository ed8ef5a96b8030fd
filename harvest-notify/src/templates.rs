//! User-facing wording of every notification.

use harvest_core::types::{Donation, DonationStatus, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub title: String,
    pub body: String,
}

impl Template {
    fn new(title: &str, body: String) -> Self {
        Template {
            title: title.to_string(),
            body,
        }
    }
}

pub fn new_donation(donation: &Donation) -> Template {
    Template::new(
        "New Food Donation Available",
        format!(
            "{} ({}) is available for pickup from {}",
            donation.food_name, donation.quantity, donation.donor_name
        ),
    )
}

/// `None` for statuses nobody is told about.
pub fn status_update(donation: &Donation, status: DonationStatus) -> Option<Template> {
    let food = &donation.food_name;
    match status {
        DonationStatus::Accepted => {
            let by = donation
                .accepted_by
                .as_ref()
                .map(|a| a.name.as_str())
                .unwrap_or("an organization");
            Some(Template::new(
                "Your Donation Has Been Accepted",
                format!("Your donation \"{}\" has been accepted by {}", food, by),
            ))
        }
        DonationStatus::PickedUp => Some(Template::new(
            "Donation Picked Up",
            format!("Your donation \"{}\" has been picked up successfully", food),
        )),
        DonationStatus::Cancelled => Some(Template::new(
            "Donation Cancelled",
            format!("The donation \"{}\" has been cancelled", food),
        )),
        DonationStatus::Rejected => Some(Template::new(
            "Donation Rejected",
            format!("Your donation \"{}\" has been rejected", food),
        )),
        DonationStatus::Pending | DonationStatus::InTransit | DonationStatus::Expired => None,
    }
}

pub fn expiry(donation: &Donation, recipient_role: Role) -> Template {
    let food = &donation.food_name;
    let body = match recipient_role {
        Role::Organization => format!(
            "The donation \"{}\" you accepted will expire soon. Please pick it up as soon as possible.",
            food
        ),
        Role::Donor | Role::Admin => format!(
            "Your donation \"{}\" will expire soon. Please ensure it's picked up in time.",
            food
        ),
    };
    Template::new("Donation Expiring Soon", body)
}
