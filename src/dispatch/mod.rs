//! # Notification Dispatch
//!
//! Delivery of rendered notifications to receivers and classification of their
//! responses. The transport sits behind [`WebhookClient`] so tests and embedders can
//! substitute their own.

pub mod client;
pub mod dispatcher;
pub mod outcome;

pub use client::{
    HttpWebhookClient, OutboundRequest, TransportError, WebhookClient, WebhookResponse,
};
pub use dispatcher::NotificationDispatcher;
pub use outcome::{
    classify_async, classify_sync, classify_transport_error, failure_state, DispatchOutcome,
};
