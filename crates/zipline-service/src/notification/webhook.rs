//! Webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use zipline_core::config::NotificationConfig;
use zipline_core::error::{AppError, ErrorKind};
use zipline_core::events::UploadCompleted;
use zipline_core::result::AppResult;
use zipline_core::traits::UploadNotifier;

/// Logs every completed upload and, when configured, POSTs it as JSON.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// Build a notifier from the `notifications` section.
    pub fn new(config: &NotificationConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build webhook client", e)
            })?;
        Ok(Self {
            client,
            url: config.webhook_url.clone().filter(|u| !u.is_empty()),
        })
    }

    /// Whether a webhook endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn deliver(&self, url: &str, event: &UploadCompleted) -> AppResult<()> {
        let body = json!({
            "type": "upload",
            "file": {
                "id": event.file_id,
                "name": event.file_name,
                "type": event.mime_type,
                "size": event.size,
                "chunked": event.chunked,
            },
            "user": {
                "id": event.user_id,
                "username": event.username,
            },
            "links": event.links,
            "completedAt": event.completed_at,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::ExternalService, "Webhook request failed", e))?;

        if !response.status().is_success() {
            return Err(AppError::external_service(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UploadNotifier for WebhookNotifier {
    async fn on_upload(&self, event: &UploadCompleted) {
        info!(
            file_id = %event.file_id,
            file_name = %event.file_name,
            user = %event.username,
            size = event.size,
            raw = %event.links.raw,
            "Upload completed"
        );

        let Some(url) = &self.url else { return };
        if let Err(e) = self.deliver(url, event).await {
            warn!(file_id = %event.file_id, error = %e, "Failed to deliver upload webhook");
        }
    }
}
