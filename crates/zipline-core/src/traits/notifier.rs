//! Notification hook fired when an upload finishes.

use async_trait::async_trait;

use crate::events::UploadCompleted;

/// Receives upload-completed events.
///
/// Delivery is best-effort. Implementations log their own failures and
/// never fail the upload that triggered them.
#[async_trait]
pub trait UploadNotifier: Send + Sync + 'static {
    /// Called once per file after its content is durably stored.
    async fn on_upload(&self, event: &UploadCompleted);
}
