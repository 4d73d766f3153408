//! Operator alert notifications.
//!
//! A side channel for critical failures (scheduled-task exhaustion, startup
//! problems): alerts are posted to a configured webhook and never fail the
//! operation that raised them. With no webhook configured they are logged
//! only.

use serde_json::{Value, json};
use tracing::{debug, error, instrument, warn};

/// Posts alert payloads to an operator webhook.
#[derive(Debug, Clone)]
pub struct AlertNotifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl AlertNotifier {
    /// Creates a notifier. `None` disables delivery; alerts are then only
    /// logged.
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// A notifier that only logs. Used in tests and when alerting is not
    /// configured.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Raises an alert. Delivery failures are logged, never propagated.
    #[instrument(skip(self, context))]
    pub async fn notify(&self, kind: &str, message: &str, context: Value) {
        let Some(url) = &self.webhook_url else {
            warn!(kind, message, "Alert raised (no webhook configured)");
            return;
        };

        let payload = json!({
            "kind": kind,
            "message": message,
            "context": context,
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(kind, "Alert delivered");
            }
            Ok(response) => {
                error!(kind, status = %response.status(), "Alert webhook rejected the alert");
            }
            Err(e) => {
                error!(kind, error = %e, "Alert webhook unreachable");
            }
        }
    }
}
