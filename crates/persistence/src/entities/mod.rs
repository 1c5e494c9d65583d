//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod invitation;
pub mod profile;

pub use invitation::*;
pub use profile::*;
