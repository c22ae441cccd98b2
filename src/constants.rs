//! # System Constants
//!
//! Event names, protocol defaults and operational limits shared across the engine.

/// Lifecycle events published on the engine's event channel
pub mod events {
    // Assignment lifecycle events
    pub const ASSIGNMENT_TRANSITIONED: &str = "formation_assignment.transitioned";
    pub const ASSIGNMENT_REMOVED: &str = "formation_assignment.removed";

    // Notification events
    pub const NOTIFICATION_DISPATCHED: &str = "notification.dispatched";
    pub const NOTIFICATION_SUPPRESSED: &str = "notification.suppressed";
    pub const NOTIFICATION_DEFERRED: &str = "notification.deferred";

    // Status report events
    pub const STATUS_REPORT_IGNORED: &str = "status_report.ignored";

    // Formation lifecycle events
    pub const FORMATION_STATE_CHANGED: &str = "formation.state_changed";
}

/// Status code a synchronous receiver returns when the operation is done
pub const DEFAULT_SUCCESS_STATUS_CODE: u16 = 200;

/// Status code a synchronous receiver returns when it needs more configuration
pub const DEFAULT_INCOMPLETE_STATUS_CODE: u16 = 204;

/// Error messages recorded on assignments
pub mod messages {
    pub const DELIVERY_FAILED_PREFIX: &str = "failed to deliver notification";
    pub const UNEXPECTED_STATUS_PREFIX: &str = "received unexpected status code";
    pub const CONFIG_PENDING_ON_UNASSIGN: &str =
        "config propagation is not supported on unassign notifications";
    pub const REPORTED_ERROR_WITHOUT_MESSAGE: &str =
        "the receiver reported an error without details";
    pub const DEFERRAL_NOT_SUPPORTED: &str = "formation notifications cannot be deferred";
}

/// Operational limits
pub mod system {
    /// Version reported by the health endpoint
    pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Default bound on concurrent deliveries within one batch
    pub const DEFAULT_MAX_CONCURRENT_NOTIFICATIONS: usize = 16;

    /// Default bound on follow-up rounds triggered by one external event
    pub const DEFAULT_MAX_FOLLOW_UP_ROUNDS: usize = 32;

    /// Default capacity of the event broadcast channel
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
}
