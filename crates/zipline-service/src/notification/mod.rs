//! Upload-completed notification delivery.

pub mod webhook;

pub use webhook::WebhookNotifier;
