//! # Orchestration
//!
//! Drives formation assignments from membership changes to READY.
//!
//! ## Components
//!
//! - [`FormationEngine`]: public entry point for management events, callbacks and queries
//! - [`AssignmentProcessor`]: guards, constraints, rendering, delivery and status
//!   application for one assignment at a time, plus the follow-up work that results
//! - [`FormationLifecycle`]: create and delete notifications for the formation itself
//! - [`EngineCore`]: stores, renderer, constraint engine, dispatcher and state machines
//!   shared by all of the above
//!
//! ## Concurrency
//!
//! Work on an assignment is serialized through its key lock, and external events on a
//! formation through the formation lock. Deliveries for independent assignments run
//! concurrently up to `engine.max_concurrent_notifications`.

pub mod assignment_processor;
pub mod core;
pub mod engine;
pub mod lifecycle;
pub mod locks;
pub mod resynchronizer;
pub mod status_aggregator;
pub mod status_reports;

pub use assignment_processor::{AssignmentProcessor, DriveSummary, WorkItem, WorkKind};
pub use self::core::{EngineCore, EngineStores};
pub use engine::{FormationEngine, ManagementOutcome};
pub use lifecycle::{FormationLifecycle, FormationReportOutcome, LifecyclePhase};
pub use locks::LockTable;
pub use resynchronizer::{plan_resync, ResyncReport};
pub use status_aggregator::{
    aggregate_condition, AssignmentStatusView, FormationErrorView, FormationStatusView,
};
pub use status_reports::{report_event, StatusReportOutcome};
