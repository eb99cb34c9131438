//! Domain models for the DentAI service.

pub mod chat;
pub mod clinic;
pub mod data_uri;
pub mod grounding;
pub mod location;

pub use chat::{ChatMessage, ChatRole};
pub use clinic::{schedule_listing, Appointment, QuickStat, StatColor, DAILY_SCHEDULE, QUICK_STATS};
pub use data_uri::{DataUri, DataUriError};
pub use grounding::{GroundedAnswer, GroundingSource};
pub use location::Coordinate;
