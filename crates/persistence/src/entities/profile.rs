//! Profile entity (database row mapping).

use domain::models::Mentor;
use sqlx::FromRow;
use uuid::Uuid;

/// Mentor columns of the profiles table.
#[derive(Debug, Clone, FromRow)]
pub struct MentorProfileEntity {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

impl From<MentorProfileEntity> for Mentor {
    fn from(entity: MentorProfileEntity) -> Self {
        Self {
            id: entity.id,
            // Fall back to the address when the mentor never set a name.
            display_name: entity
                .display_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| entity.email.clone()),
            email: Some(entity.email),
        }
    }
}
