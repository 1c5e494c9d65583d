//! Shared utilities and common types for the MentorLink backend.
//!
//! This crate provides functionality used across all other crates:
//! - Input validation and normalisation helpers

pub mod validation;
