pub mod apns;
pub mod channel;
pub mod email;
pub mod fcm;
pub mod push;

pub use apns::ApnsTransport;
pub use channel::{Channel, DeliveryError, Destination, OutboundMessage, RecordingChannel};
pub use email::EmailChannel;
pub use fcm::FcmTransport;
pub use push::{PushChannel, PushTransport};

use harvest_core::config::Config;
use std::sync::Arc;

/// Builds the email and push channels from configuration. Unconfigured
/// transports are still returned and report `NotConfigured` on send.
pub fn default_channels(config: &Config) -> anyhow::Result<Vec<Arc<dyn Channel>>> {
    let email = EmailChannel::new(&config.delivery, &config.server.frontend_url)?;

    let mut transports: Vec<Arc<dyn PushTransport>> = Vec::new();
    if let Some(apns) = ApnsTransport::new(&config.delivery)? {
        transports.push(Arc::new(apns));
    }
    if let Some(fcm) = FcmTransport::new(&config.delivery) {
        transports.push(Arc::new(fcm));
    }
    let push = PushChannel::new(transports);

    let channels: Vec<Arc<dyn Channel>> = vec![Arc::new(email), Arc::new(push)];
    Ok(channels)
}
