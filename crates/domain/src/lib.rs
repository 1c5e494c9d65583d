//! Domain layer for the MentorLink backend.
//!
//! This crate contains:
//! - Domain models (invitations, mentors, email delivery outcomes)
//! - The invitation lifecycle services (issuer, dispatcher, verifier,
//!   registration completion) and the store traits they depend on

pub mod models;
pub mod services;
