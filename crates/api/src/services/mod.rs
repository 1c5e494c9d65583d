//! External service integrations.

pub mod auth;
pub mod email;

pub use auth::HostedAuthClient;
pub use email::{build_dispatcher, build_provider, EmailSetupError};
