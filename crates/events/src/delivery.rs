//! External webhook delivery of moderation events.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::bus::ModerationEvent;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Posts JSON-encoded events to external endpoints with bounded retry.
pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest HTTP client");
        Self { client }
    }

    /// Deliver one event, retrying with backoff before giving up.
    pub async fn deliver(&self, url: &str, event: &ModerationEvent) -> Result<(), WebhookError> {
        let mut last_err = match self.try_send(url, event).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        for (attempt, delay_secs) in RETRY_DELAYS_SECS.iter().enumerate() {
            tracing::warn!(
                attempt = attempt + 1,
                url,
                error = %last_err,
                "Webhook delivery attempt failed, retrying"
            );
            tokio::time::sleep(Duration::from_secs(*delay_secs)).await;

            match self.try_send(url, event).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }

        tracing::error!(url, error = %last_err, "Webhook delivery failed after all retries");
        Err(last_err)
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, event: &ModerationEvent) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(event).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

impl Default for WebhookDelivery {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WebhookFanout
// ---------------------------------------------------------------------------

/// Background task that forwards every bus event to the configured URLs.
pub struct WebhookFanout {
    delivery: WebhookDelivery,
    urls: Vec<String>,
}

impl WebhookFanout {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            delivery: WebhookDelivery::new(),
            urls,
        }
    }

    /// Run the fan-out loop until the channel closes. Delivery failures
    /// are logged and never feed back into the engine.
    pub async fn run(self, mut receiver: broadcast::Receiver<ModerationEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    for url in &self.urls {
                        if let Err(e) = self.delivery.deliver(url, &event).await {
                            tracing::error!(
                                url,
                                event_type = %event.event_type,
                                error = %e,
                                "Webhook fan-out failed"
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Webhook fan-out lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, webhook fan-out shutting down");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn building_the_client_does_not_panic() {
        let _delivery = WebhookDelivery::new();
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "webhook returned HTTP 502");
    }
}
