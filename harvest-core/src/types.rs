use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(anyhow::anyhow!("Unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "donor")]
    Donor,
    #[serde(rename = "ngo", alias = "organization")]
    Organization,
    #[serde(rename = "admin")]
    Admin,
}

text_enum!(Role {
    Donor => "donor",
    Organization => "ngo",
    Admin => "admin",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Accepted,
    InTransit,
    PickedUp,
    Rejected,
    Cancelled,
    Expired,
}

text_enum!(DonationStatus {
    Pending => "pending",
    Accepted => "accepted",
    InTransit => "in_transit",
    PickedUp => "picked_up",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Expired => "expired",
});

impl DonationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DonationStatus::PickedUp
                | DonationStatus::Rejected
                | DonationStatus::Cancelled
                | DonationStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Donation,
    StatusUpdate,
    ExpiryAlert,
}

text_enum!(NotificationKind {
    Donation => "donation",
    StatusUpdate => "status_update",
    ExpiryAlert => "expiry_alert",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Active,
    Closed,
}

text_enum!(ChatStatus {
    Active => "active",
    Closed => "closed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Web,
    Android,
    Ios,
}

text_enum!(Platform {
    Web => "web",
    Android => "android",
    Ios => "ios",
});

/// The authenticated caller of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub organization: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: Option<String>,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedBy {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub donor_name: String,
    pub food_name: String,
    pub quantity: String,
    pub description: Option<String>,
    pub expiry_time: DateTime<Utc>,
    pub image: Option<String>,
    pub location: Location,
    pub status: DonationStatus,
    pub accepted_by: Option<AcceptedBy>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Donor-supplied fields of a new donation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDonation {
    pub food_name: String,
    pub quantity: String,
    #[serde(default)]
    pub description: Option<String>,
    pub expiry_time: DateTime<Utc>,
    #[serde(default)]
    pub image: Option<String>,
    pub location: Location,
}

impl Donation {
    pub fn from_new(donor: &Actor, new: NewDonation, now: DateTime<Utc>) -> Self {
        Donation {
            id: Uuid::new_v4(),
            donor_id: donor.id,
            donor_name: donor.name.clone(),
            food_name: new.food_name,
            quantity: new.quantity,
            description: new.description,
            expiry_time: new.expiry_time,
            image: new.image,
            location: new.location,
            status: DonationStatus::Pending,
            accepted_by: None,
            pickup_time: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_role: Role,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: Vec<ReadReceipt>,
}

impl ChatMessage {
    /// Builds a message authored by `sender`, who has implicitly read it.
    pub fn authored_by(sender: &Actor, body: impl Into<String>, now: DateTime<Utc>) -> Self {
        ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender.id,
            sender_name: sender.name.clone(),
            sender_role: sender.role,
            message: body.into(),
            timestamp: now,
            read: vec![ReadReceipt {
                user_id: sender.id,
                read_at: now,
            }],
        }
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read.iter().any(|r| r.user_id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: Uuid,
    pub donation_id: Uuid,
    pub participants: Vec<Participant>,
    pub messages: Vec<ChatMessage>,
    pub status: ChatStatus,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub donation_id: Option<Uuid>,
    pub read: bool,
    pub email_sent: bool,
    pub push_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        donation_id: Option<Uuid>,
    ) -> Self {
        Notification {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            donation_id,
            read: false,
            email_sent: false,
            push_sent: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub platform: Platform,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a user can be reached: email always, push once a device is registered.
#[derive(Debug, Clone)]
pub struct ContactProfile {
    pub user_id: Uuid,
    pub email: String,
    pub devices: Vec<DeviceToken>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub total: i64,
    pub donors: i64,
    pub ngos: i64,
    pub verified: i64,
    pub unverified: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationStats {
    pub total: i64,
    pub pending: i64,
    pub accepted: i64,
    pub in_transit: i64,
    pub picked_up: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub users: UserStats,
    pub donations: DonationStats,
}
