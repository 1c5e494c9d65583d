//! Domain models.

pub mod delivery;
pub mod invitation;
pub mod mentor;

pub use delivery::*;
pub use invitation::*;
pub use mentor::*;
