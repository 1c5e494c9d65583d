//! Client invitation entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::InvitationRecord;
use domain::services::StoreError;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the client_invitations table.
#[derive(Debug, Clone, FromRow)]
pub struct ClientInvitationEntity {
    pub id: Uuid,
    pub code: String,
    pub email: String,
    pub mentor_id: Uuid,
    pub role: String,
    pub invitee_name: Option<String>,
    pub is_used: bool,
    pub used_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<ClientInvitationEntity> for InvitationRecord {
    type Error = StoreError;

    fn try_from(entity: ClientInvitationEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            role: entity.role.parse().map_err(StoreError::Persistence)?,
            id: entity.id,
            code: entity.code,
            email: entity.email,
            mentor_id: entity.mentor_id,
            invitee_name: entity.invitee_name,
            is_used: entity.is_used,
            used_by: entity.used_by,
            created_at: entity.created_at,
            expires_at: entity.expires_at,
        })
    }
}

/// Row returned by the `issue_client_invitation` function.
#[derive(Debug, Clone, FromRow)]
pub struct IssuedInvitationEntity {
    #[sqlx(flatten)]
    pub invitation: ClientInvitationEntity,
    pub renewed: bool,
}
