use a2::{Client, Endpoint, LocalizedNotificationBuilder, NotificationBuilder, NotificationOptions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use harvest_core::config::DeliveryConfig;
use harvest_core::types::Platform;
use std::fs;

use crate::channel::{DeliveryError, OutboundMessage};
use crate::push::PushTransport;

/// Apple Push Notification service for iOS devices. APNs takes one device
/// per request, so a batch fans out into concurrent sends.
pub struct ApnsTransport {
    client: Client,
    bundle_id: String,
}

impl ApnsTransport {
    /// `None` when the key id or team id is missing.
    pub fn new(config: &DeliveryConfig) -> Result<Option<Self>> {
        let (Some(key_id), Some(team_id)) = (&config.apns_key_id, &config.apns_team_id) else {
            tracing::warn!("APNs delivery disabled (missing configuration)");
            return Ok(None);
        };
        tracing::info!("Initializing APNs client");

        let key_content = if let Some(key_content_base64) = &config.apns_key_content {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key_content_base64)
                .map_err(|e| anyhow!("Failed to decode base64 APNs key: {}", e))?;
            String::from_utf8(decoded)
                .map_err(|e| anyhow!("Failed to convert APNs key to UTF-8: {}", e))?
        } else if let Some(key_path) = &config.apns_key_path {
            fs::read_to_string(key_path)
                .map_err(|e| anyhow!("Failed to read APNs key file {}: {}", key_path, e))?
        } else {
            return Err(anyhow!("Either APNS_KEY_PATH or APNS_KEY_CONTENT must be provided"));
        };

        let bundle_id = config.apns_bundle_id.clone().unwrap_or_default();
        let endpoint = if bundle_id.contains("sandbox") || bundle_id.contains("dev") {
            Endpoint::Sandbox
        } else {
            Endpoint::Production
        };

        let client = Client::token(key_content.as_bytes(), key_id, team_id, endpoint)
            .map_err(|e| anyhow!("Failed to create APNs client: {}", e))?;

        Ok(Some(Self { client, bundle_id }))
    }

    async fn send_one(&self, token: &str, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let mut builder = LocalizedNotificationBuilder::new(&message.title, &message.body);
        builder.set_sound("default");

        let mut options = NotificationOptions::default();
        if !self.bundle_id.is_empty() {
            options.apns_topic = Some(&self.bundle_id);
        }

        let mut payload = builder.build(token, options);
        payload
            .add_custom_data("data", &message.metadata)
            .map_err(|e| DeliveryError::Transport(format!("Failed to encode APNs data: {}", e)))?;

        self.client
            .send(payload)
            .await
            .map_err(|e| DeliveryError::Transport(format!("APNs send failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl PushTransport for ApnsTransport {
    fn name(&self) -> &'static str {
        "apns"
    }

    fn handles(&self, platform: Platform) -> bool {
        platform == Platform::Ios
    }

    /// Succeeds if any device accepted the notification.
    async fn send_batch(&self, tokens: &[String], message: &OutboundMessage) -> Result<(), DeliveryError> {
        let results = join_all(tokens.iter().map(|t| self.send_one(t, message))).await;

        let mut last_error = None;
        let mut delivered = 0usize;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => last_error = Some(e),
            }
        }

        tracing::debug!("APNs delivered to {}/{} device(s)", delivered, tokens.len());
        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}
