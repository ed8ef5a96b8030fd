use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::types::{Donation, DonationStatus, Role};

/// A donation changed status. Carries the snapshot written to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub donation_id: Uuid,
    pub previous_status: DonationStatus,
    pub new_status: DonationStatus,
    pub actor_role: Role,
    pub donation: Donation,
}

/// A donation is about to expire. Emitted by the scanner once per matching
/// donation per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryEvent {
    pub donation: Donation,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "event_data", rename_all = "snake_case")]
pub enum NotifyEvent {
    DonationCreated(Donation),
    Lifecycle(LifecycleEvent),
    Expiry(ExpiryEvent),
}

impl NotifyEvent {
    pub fn donation_id(&self) -> Uuid {
        match self {
            NotifyEvent::DonationCreated(d) => d.id,
            NotifyEvent::Lifecycle(e) => e.donation_id,
            NotifyEvent::Expiry(e) => e.donation.id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            NotifyEvent::DonationCreated(_) => "donation.created",
            NotifyEvent::Lifecycle(_) => "donation.status_changed",
            NotifyEvent::Expiry(_) => "donation.expiring",
        }
    }
}

/// Receives domain events after the state they describe is durable.
/// `emit` must not block on delivery and must not fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NotifyEvent);
}

/// Keeps every emitted event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: NotifyEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
