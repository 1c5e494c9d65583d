//! HTTP route handlers.

pub mod health;
pub mod invitations;
pub mod registration;
