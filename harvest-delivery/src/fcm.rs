use async_trait::async_trait;
use fcm::{Client, MessageBuilder, NotificationBuilder};
use harvest_core::config::DeliveryConfig;
use harvest_core::types::Platform;

use crate::channel::{DeliveryError, OutboundMessage};
use crate::push::PushTransport;

/// Firebase Cloud Messaging. One multicast request per batch of tokens.
pub struct FcmTransport {
    client: Client,
    server_key: String,
}

impl FcmTransport {
    pub fn new(config: &DeliveryConfig) -> Option<Self> {
        match &config.fcm_server_key {
            Some(key) if !key.is_empty() => {
                tracing::info!("Initializing FCM client");
                Some(Self {
                    client: Client::new(),
                    server_key: key.clone(),
                })
            }
            _ => {
                tracing::warn!("FCM delivery disabled (missing configuration)");
                None
            }
        }
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    fn name(&self) -> &'static str {
        "fcm"
    }

    fn handles(&self, _platform: Platform) -> bool {
        true
    }

    async fn send_batch(&self, tokens: &[String], message: &OutboundMessage) -> Result<(), DeliveryError> {
        if tokens.is_empty() {
            return Ok(());
        }

        let mut notification = NotificationBuilder::new();
        notification.title(&message.title);
        notification.body(&message.body);

        let mut builder = MessageBuilder::new_multi(&self.server_key, tokens);
        builder.notification(notification.finalize());
        builder
            .data(&message.metadata)
            .map_err(|e| DeliveryError::Transport(format!("Failed to encode FCM data: {}", e)))?;

        let response = self
            .client
            .send(builder.finalize())
            .await
            .map_err(|e| DeliveryError::Transport(format!("FCM request failed: {}", e)))?;

        if let Some(error) = response.error {
            return Err(DeliveryError::Transport(format!("FCM error: {:?}", error)));
        }

        let succeeded = response.success.unwrap_or(0);
        let failed = response.failure.unwrap_or(0);
        if succeeded == 0 && failed > 0 {
            return Err(DeliveryError::Transport(format!(
                "FCM rejected all {} token(s)",
                failed
            )));
        }

        tracing::debug!("FCM multicast delivered to {}/{} token(s)", succeeded, tokens.len());
        Ok(())
    }
}
