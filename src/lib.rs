#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Formation Engine
//!
//! Notification engine for formations: named groupings of participants (applications,
//! runtimes, runtime contexts) that must be told about each other.
//!
//! ## Overview
//!
//! Every ordered pair of members gets a formation assignment, and every member a
//! self-assignment. Each assignment walks its own lifecycle: the engine renders a webhook
//! notification for the target, delivers it, interprets the synchronous response or the
//! later asynchronous status report, and moves the assignment through its states until
//! it is READY or removed. Configuration handed back by one side is forwarded to the
//! other side of the pair.
//!
//! Constraints attached at join points can veto operations, suppress or defer
//! notifications, redirect them to extra destinations, and rewrite reported statuses.
//!
//! ## Module Organization
//!
//! - [`models`] - Participants, formations, assignments, constraints and reports
//! - [`state_machine`] - Assignment and formation lifecycles with optimistic writes
//! - [`templates`] - The webhook template language
//! - [`constraints`] - Join point operators and their evaluation
//! - [`dispatch`] - Webhook delivery and response classification
//! - [`orchestration`] - The engine driving assignments to READY
//! - [`store`] - Store traits and the in-memory implementation
//! - [`web`] - HTTP API
//! - [`config`], [`logging`], [`events`], [`error`] - Ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formation_engine::config::EngineConfig;
//! use formation_engine::orchestration::{EngineStores, FormationEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let engine = FormationEngine::from_config(&config, EngineStores::in_memory())?;
//! let mut events = engine.subscribe();
//! # let _ = &mut events;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod constraints;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;
pub mod templates;
pub mod web;

pub use config::{ConfigManager, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use orchestration::{EngineStores, FormationEngine};
