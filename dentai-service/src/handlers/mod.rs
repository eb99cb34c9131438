//! HTTP handlers for the DentAI service.

pub mod health;
pub mod metrics;
pub mod workspaces;
