use anyhow::{anyhow, Result};
use async_trait::async_trait;
use harvest_core::config::DeliveryConfig;
use harvest_core::types::ContactProfile;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, DeliveryError, Destination, OutboundMessage};

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const SUBJECT_PREFIX: &str = "GiveGood Harvest";

fn html_escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

fn subject_for(title: &str) -> String {
    format!("{} - {}", SUBJECT_PREFIX, title)
}

fn render_html(title: &str, body: &str, frontend_url: &str) -> String {
    format!(
        r#"<h2>{}</h2>
<p>{}</p>
<p>Visit <a href="{}">GiveGood Harvest</a> to view more details.</p>"#,
        html_escape(title),
        html_escape(body),
        html_escape(frontend_url)
    )
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

struct ResendClient {
    http: reqwest::Client,
    api_key: String,
    from_email: String,
}

/// Sends one HTML email per notification through the Resend API.
pub struct EmailChannel {
    client: Option<ResendClient>,
    frontend_url: String,
}

impl EmailChannel {
    pub fn new(config: &DeliveryConfig, frontend_url: &str) -> Result<Self> {
        let client = match (&config.resend_api_key, &config.resend_from_email) {
            (Some(api_key), Some(from_email)) => {
                tracing::info!("Initializing Resend email client");
                let http = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(30))
                    .build()
                    .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
                Some(ResendClient {
                    http,
                    api_key: api_key.clone(),
                    from_email: from_email.clone(),
                })
            }
            _ => {
                tracing::warn!("Email delivery disabled (missing Resend configuration)");
                None
            }
        };

        Ok(Self {
            client,
            frontend_url: frontend_url.to_string(),
        })
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn destinations(&self, profile: &ContactProfile) -> Vec<Destination> {
        if profile.email.trim().is_empty() {
            return Vec::new();
        }
        vec![Destination::email(profile.email.clone())]
    }

    async fn send(
        &self,
        destinations: &[Destination],
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        let client = self
            .client
            .as_ref()
            .ok_or(DeliveryError::NotConfigured("email"))?;

        let request = ResendEmailRequest {
            from: client.from_email.clone(),
            to: destinations.iter().map(|d| d.address.clone()).collect(),
            subject: subject_for(&message.title),
            html: render_html(&message.title, &message.body, &self.frontend_url),
            text: message.body.clone(),
        };

        let response = client
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&client.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("Resend request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let sent: ResendEmailResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("Failed to parse Resend response: {}", e)))?;

        tracing::debug!("Email {} sent to {} recipient(s)", sent.id, request.to.len());
        Ok(())
    }
}
