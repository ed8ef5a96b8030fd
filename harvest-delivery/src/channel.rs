use async_trait::async_trait;
use harvest_core::types::{ContactProfile, Platform};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0} delivery is not configured")]
    NotConfigured(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("delivery timed out")]
    Timeout,
}

/// One address a channel can reach a user at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: String,
    pub platform: Option<Platform>,
}

impl Destination {
    pub fn email(address: impl Into<String>) -> Self {
        Destination {
            address: address.into(),
            platform: None,
        }
    }

    pub fn device(token: impl Into<String>, platform: Platform) -> Self {
        Destination {
            address: token.into(),
            platform: Some(platform),
        }
    }
}

/// What gets delivered, independent of the channel carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub title: String,
    pub body: String,
    /// Opaque key/value pairs forwarded as push data (`type`, `donationId`, `notificationId`).
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable name, also the key under which the outcome is recorded.
    fn name(&self) -> &'static str;

    /// Where this channel would reach the user. Empty means the channel is
    /// unavailable for them.
    fn destinations(&self, profile: &ContactProfile) -> Vec<Destination>;

    async fn send(
        &self,
        destinations: &[Destination],
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError>;
}

/// Remembers every send and optionally fails them. Used by fan-out tests.
pub struct RecordingChannel {
    name: &'static str,
    fail: bool,
    reach_devices: bool,
    sent: Mutex<Vec<(Vec<Destination>, OutboundMessage)>>,
}

impl RecordingChannel {
    /// Reaches users at their email address.
    pub fn email() -> Self {
        Self::build("email", false, false)
    }

    /// Reaches users on their active devices.
    pub fn push() -> Self {
        Self::build("push", false, true)
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn build(name: &'static str, fail: bool, reach_devices: bool) -> Self {
        RecordingChannel {
            name,
            fail,
            reach_devices,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(Vec<Destination>, OutboundMessage)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn destinations(&self, profile: &ContactProfile) -> Vec<Destination> {
        if self.reach_devices {
            profile
                .devices
                .iter()
                .filter(|d| d.active)
                .map(|d| Destination::device(d.token.clone(), d.platform))
                .collect()
        } else {
            vec![Destination::email(profile.email.clone())]
        }
    }

    async fn send(
        &self,
        destinations: &[Destination],
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((destinations.to_vec(), message.clone()));
        }
        if self.fail {
            return Err(DeliveryError::Transport(format!("{} forced failure", self.name)));
        }
        Ok(())
    }
}
