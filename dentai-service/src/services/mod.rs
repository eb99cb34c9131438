pub mod gateway;
pub mod metrics;
pub mod providers;
pub mod workspaces;

pub use gateway::{ChatSession, ChatSessionFactory, ClinicGateway, GatewayError};
pub use workspaces::WorkspaceRegistry;
