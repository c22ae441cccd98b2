use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use super::client::{OutboundRequest, WebhookClient};
use super::outcome::{classify_async, classify_sync, classify_transport_error, DispatchOutcome};
use crate::logging::log_notification_dispatch;
use crate::models::{Destination, Notification, WebhookMode};

/// Delivers rendered notifications and classifies what comes back
#[derive(Clone)]
pub struct NotificationDispatcher {
    client: Arc<dyn WebhookClient>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(client: Arc<dyn WebhookClient>) -> Self {
        Self { client }
    }

    /// Deliver to the notification's own destination in its webhook's mode
    pub async fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        self.dispatch_to(notification, &notification.destination, notification.mode)
            .await
    }

    /// Deliver the same request to another destination, e.g. a fan-out or secondary target
    pub async fn dispatch_to(
        &self,
        notification: &Notification,
        destination: &Destination,
        mode: WebhookMode,
    ) -> DispatchOutcome {
        let unassign = notification.operation.is_removal();
        let request = OutboundRequest::to_destination(notification, destination);
        let started = Instant::now();

        let result = self.client.send(&request).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).ok();

        match result {
            Ok(response) => {
                let outcome = match mode {
                    WebhookMode::Sync => {
                        classify_sync(unassign, &response, &notification.output_rule)
                    }
                    WebhookMode::AsyncCallback => {
                        classify_async(unassign, &response, &notification.output_rule)
                    }
                };
                log_notification_dispatch(
                    notification.formation_id,
                    notification.assignment_id,
                    &destination.to_string(),
                    outcome.label(),
                    Some(response.status_code),
                    duration_ms,
                );
                outcome
            }
            Err(error) => {
                warn!(
                    formation_id = %notification.formation_id,
                    assignment_id = ?notification.assignment_id,
                    destination = %destination,
                    error = %error,
                    "Notification delivery failed"
                );
                log_notification_dispatch(
                    notification.formation_id,
                    notification.assignment_id,
                    &destination.to_string(),
                    "transport_error",
                    None,
                    duration_ms,
                );
                classify_transport_error(unassign, &error)
            }
        }
    }
}
