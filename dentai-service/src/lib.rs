//! DentAI: a dental-clinic assistant service.
//!
//! Server-side view controllers (dashboard, imaging, research, referral map,
//! assistant chat) sit behind an HTTP API and delegate every generative task
//! to a single gateway over a hosted generative-AI provider.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod views;

pub use startup::AppState;
