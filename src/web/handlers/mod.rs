//! # Web API Request Handlers

pub mod assignments;
pub mod events;
pub mod formations;
pub mod health;
pub mod registry;
