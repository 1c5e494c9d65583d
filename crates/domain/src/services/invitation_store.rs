//! Invitation persistence boundary.
//!
//! Every call goes to the durable store; implementations do not cache.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{InvitationRecord, Mentor, NewInvitation};

/// Errors raised by invitation and profile stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Persistence(String),

    #[error("Invitation {0} not found")]
    NotFound(Uuid),

    #[error("Invitation {id} has already been used")]
    AlreadyUsed { id: Uuid },

    /// A unique constraint rejected the write (e.g. a code collision).
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// The store cannot perform atomic issuance.
    #[error("Atomic issuance is not available")]
    Unavailable,
}

/// Result of an insert-or-renew issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedInvitation {
    pub record: InvitationRecord,
    /// True when an existing valid invitation was renewed instead of created.
    pub renewed: bool,
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Most recently created valid invitation for the pair, if any.
    async fn find_valid_invite(
        &self,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<Option<InvitationRecord>, StoreError>;

    /// Inserts a new unused invitation expiring one TTL from now.
    async fn create_invite(&self, invitation: &NewInvitation)
        -> Result<InvitationRecord, StoreError>;

    /// Pushes the expiry of an unused invitation one TTL from now.
    async fn renew_invite(&self, id: Uuid) -> Result<Uuid, StoreError>;

    /// Valid invitation carrying `code`, optionally restricted to `email`.
    async fn resolve_by_code(
        &self,
        code: &str,
        email: Option<&str>,
    ) -> Result<Option<InvitationRecord>, StoreError>;

    /// Most recent valid invitation addressed to `email`.
    async fn resolve_by_email(&self, email: &str) -> Result<Option<InvitationRecord>, StoreError>;

    /// Consumes an invitation. Repeating the call with the same consumer is a
    /// no-op; a different consumer gets [`StoreError::AlreadyUsed`].
    async fn mark_used(&self, id: Uuid, consumer_id: Uuid) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InvitationRecord>, StoreError>;

    /// Most recent unused invitation for the pair, regardless of expiry.
    async fn latest_unused_for_email(
        &self,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<Option<InvitationRecord>, StoreError>;

    /// All invitations of a mentor, newest first.
    async fn list_for_mentor(&self, mentor_id: Uuid) -> Result<Vec<InvitationRecord>, StoreError>;

    /// Renews the pair's valid invitation or inserts `invitation`, as one
    /// atomic operation. Stores without that capability return
    /// [`StoreError::Unavailable`].
    async fn issue_atomic(
        &self,
        _invitation: &NewInvitation,
    ) -> Result<IssuedInvitation, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Profile boundary used to resolve mentors and link clients to them.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_mentor(&self, mentor_id: Uuid) -> Result<Option<Mentor>, StoreError>;

    /// Sets the mentor of a client account, creating its profile if needed.
    async fn assign_mentor(
        &self,
        account_id: Uuid,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<(), StoreError>;
}
