//! SendGrid email transport.
//!
//! Sends rendered sequence emails through the SendGrid v3 mail-send API. The
//! scheduled email id travels in `custom_args` so open and click webhooks can
//! be attributed back to the step that produced them.

use async_trait::async_trait;
use drip_automation::transport::{EmailTransport, OutboundEmail, TransportError, TransportReceipt};
use drip_core::config::SendGridConfig;
use drip_core::{DripError, DripResult};
use tracing::{debug, info, warn};

pub struct SendGridTransport {
    config: SendGridConfig,
    api_key: String,
    client: reqwest::Client,
}

impl SendGridTransport {
    /// Requires `sendgrid.api_key` to be set.
    pub fn new(config: SendGridConfig) -> DripResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| DripError::Config("sendgrid.api_key is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| DripError::Transport(format!("failed to build HTTP client: {}", e)))?;

        info!(
            from = %config.from_email,
            api_url = %config.api_url,
            open_tracking = config.open_tracking,
            click_tracking = config.click_tracking,
            "SendGrid transport initialized"
        );
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    pub fn config(&self) -> &SendGridConfig {
        &self.config
    }

    /// The v3 mail-send request body for one message.
    pub fn build_payload(&self, email: &OutboundEmail) -> serde_json::Value {
        let mut to = serde_json::json!({ "email": email.to_address });
        if !email.to_name.is_empty() {
            to["name"] = serde_json::Value::String(email.to_name.clone());
        }

        serde_json::json!({
            "personalizations": [{
                "to": [to],
                "custom_args": {
                    "scheduled_email_id": email.scheduled_email_id.to_string(),
                    "enrollment_id": email.enrollment_id.to_string(),
                    "step_index": email.step_index.to_string()
                }
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": email.subject,
            "content": [{
                "type": "text/html",
                "value": email.html_body
            }],
            "tracking_settings": {
                "click_tracking": {"enable": self.config.click_tracking},
                "open_tracking": {"enable": self.config.open_tracking}
            }
        })
    }
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError> {
        let start = std::time::Instant::now();
        debug!(
            scheduled_email_id = %email.scheduled_email_id,
            to = %email.to_address,
            subject = %email.subject,
            "Sending email via SendGrid"
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.build_payload(email))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        metrics::histogram!("sendgrid.request_latency_ms")
            .record(start.elapsed().as_millis() as f64);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            metrics::counter!("sendgrid.rejected", "status" => status.as_u16().to_string())
                .increment(1);
            warn!(
                scheduled_email_id = %email.scheduled_email_id,
                status = status.as_u16(),
                "SendGrid rejected message"
            );
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let provider_message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(TransportReceipt {
            provider_message_id,
        })
    }
}
