use async_trait::async_trait;
use futures::future::join_all;
use harvest_core::types::{ContactProfile, Platform};
use std::sync::Arc;

use crate::channel::{Channel, DeliveryError, Destination, OutboundMessage};

/// A push provider able to reach some device platforms.
#[async_trait]
pub trait PushTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, platform: Platform) -> bool;

    /// Delivers to every token in one provider call where the provider allows it.
    async fn send_batch(&self, tokens: &[String], message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// Routes each device to the first transport handling its platform.
pub struct PushChannel {
    transports: Vec<Arc<dyn PushTransport>>,
}

impl PushChannel {
    pub fn new(transports: Vec<Arc<dyn PushTransport>>) -> Self {
        if transports.is_empty() {
            tracing::warn!("Push delivery disabled (no transport configured)");
        }
        Self { transports }
    }

    fn group(&self, destinations: &[Destination]) -> Vec<(Arc<dyn PushTransport>, Vec<String>)> {
        let mut groups: Vec<(Arc<dyn PushTransport>, Vec<String>)> = Vec::new();
        for destination in destinations {
            let platform = destination.platform.unwrap_or_default();
            let Some(transport) = self.transports.iter().find(|t| t.handles(platform)) else {
                tracing::debug!("No push transport for {} device, skipping", platform);
                continue;
            };
            match groups.iter_mut().find(|(t, _)| Arc::ptr_eq(t, transport)) {
                Some((_, tokens)) => tokens.push(destination.address.clone()),
                None => groups.push((transport.clone(), vec![destination.address.clone()])),
            }
        }
        groups
    }
}

#[async_trait]
impl Channel for PushChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    fn destinations(&self, profile: &ContactProfile) -> Vec<Destination> {
        profile
            .devices
            .iter()
            .filter(|d| d.active)
            .map(|d| Destination::device(d.token.clone(), d.platform))
            .collect()
    }

    /// Succeeds when at least one provider batch went through. No destinations
    /// is a successful no-op.
    async fn send(
        &self,
        destinations: &[Destination],
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        if destinations.is_empty() {
            return Ok(());
        }

        let groups = self.group(destinations);
        if groups.is_empty() {
            return Err(DeliveryError::NotConfigured("push"));
        }

        let results = join_all(groups.iter().map(|(transport, tokens)| async move {
            let result = transport.send_batch(tokens, message).await;
            if let Err(e) = &result {
                tracing::warn!(
                    "{} push to {} device(s) failed: {}",
                    transport.name(),
                    tokens.len(),
                    e
                );
            }
            result
        }))
        .await;

        let mut last_error = None;
        let mut delivered = false;
        for result in results {
            match result {
                Ok(()) => delivered = true,
                Err(e) => last_error = Some(e),
            }
        }

        match (delivered, last_error) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => Ok(()),
        }
    }
}
