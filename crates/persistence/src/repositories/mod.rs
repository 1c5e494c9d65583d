//! PostgreSQL implementations of the domain store traits.

pub mod invitation;
pub mod profile;

pub use invitation::InvitationRepository;
pub use profile::ProfileRepository;

use domain::services::StoreError;
use tracing::{debug, error};

const UNIQUE_VIOLATION: &str = "23505";
const UNDEFINED_FUNCTION: &str = "42883";

/// Maps a driver error onto the store error taxonomy.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                debug!(constraint = ?db.constraint(), "Unique violation");
                return StoreError::Conflict(db.message().to_string());
            }
            Some(UNDEFINED_FUNCTION) => {
                debug!("Database function missing");
                return StoreError::Unavailable;
            }
            _ => {}
        }
    }
    error!(error = %err, "Database error");
    StoreError::Persistence(err.to_string())
}
