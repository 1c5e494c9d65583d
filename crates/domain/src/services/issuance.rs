//! Strategies for persisting an invitation for an (email, mentor) pair.
//!
//! [`AtomicIssuance`] asks the store to insert-or-renew in one server-side
//! operation. [`OrchestratedIssuance`] performs the read-then-write from the
//! application; two concurrent callers may both create a record for the same
//! pair. Code collisions are retried with a fresh code.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::invitation_store::{InvitationStore, IssuedInvitation, StoreError};
use crate::models::NewInvitation;

/// Default number of extra attempts after a code collision.
pub const DEFAULT_MAX_CODE_RETRIES: u32 = 3;

#[async_trait]
pub trait IssuanceStrategy: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn issue(
        &self,
        store: &dyn InvitationStore,
        invitation: NewInvitation,
    ) -> Result<IssuedInvitation, StoreError>;
}

/// Server-side insert-or-renew.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicIssuance;

#[async_trait]
impl IssuanceStrategy for AtomicIssuance {
    fn name(&self) -> &'static str {
        "atomic"
    }

    async fn issue(
        &self,
        store: &dyn InvitationStore,
        invitation: NewInvitation,
    ) -> Result<IssuedInvitation, StoreError> {
        store.issue_atomic(&invitation).await
    }
}

/// Client-side find, then renew or create.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratedIssuance {
    max_code_retries: u32,
}

impl OrchestratedIssuance {
    pub fn new(max_code_retries: u32) -> Self {
        Self { max_code_retries }
    }
}

impl Default for OrchestratedIssuance {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CODE_RETRIES)
    }
}

#[async_trait]
impl IssuanceStrategy for OrchestratedIssuance {
    fn name(&self) -> &'static str {
        "orchestrated"
    }

    async fn issue(
        &self,
        store: &dyn InvitationStore,
        mut invitation: NewInvitation,
    ) -> Result<IssuedInvitation, StoreError> {
        let mut attempt = 0;
        loop {
            // Re-read on every attempt: a concurrent caller may have created
            // the pair's invitation since the last try.
            if let Some(existing) = store
                .find_valid_invite(&invitation.email, invitation.mentor_id)
                .await?
            {
                let id = store.renew_invite(existing.id).await?;
                let record = store.find_by_id(id).await?.ok_or(StoreError::NotFound(id))?;
                debug!(invitation_id = %id, "Renewed existing invitation");
                return Ok(IssuedInvitation {
                    record,
                    renewed: true,
                });
            }

            match store.create_invite(&invitation).await {
                Ok(record) => {
                    return Ok(IssuedInvitation {
                        record,
                        renewed: false,
                    })
                }
                Err(StoreError::Conflict(reason)) if attempt < self.max_code_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        reason = %reason,
                        "Invitation insert conflicted, retrying with a new code"
                    );
                    invitation.regenerate_code();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvitationRecord;
    use crate::services::clock::{Clock, ManualClock};
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;
    use std::sync::Arc;
    use uuid::Uuid;

    fn store() -> (InMemoryInvitationStore, ManualClock) {
        let clock = ManualClock::starting_now();
        (InMemoryInvitationStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_orchestrated_creates_then_renews() {
        let (store, clock) = store();
        let mentor = Uuid::new_v4();
        let strategy = OrchestratedIssuance::default();

        let first = strategy
            .issue(&store, NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        assert!(!first.renewed);

        clock.advance(Duration::seconds(1));
        let second = strategy
            .issue(&store, NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        assert!(second.renewed);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.code, first.record.code);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_orchestrated_does_not_renew_expired() {
        let (store, clock) = store();
        let mentor = Uuid::new_v4();
        let strategy = OrchestratedIssuance::default();

        let first = strategy
            .issue(&store, NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        clock.advance(Duration::days(8));

        let second = strategy
            .issue(&store, NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        assert!(!second.renewed);
        assert_ne!(second.record.id, first.record.id);
    }

    #[tokio::test]
    async fn test_orchestrated_retries_code_collision() {
        let (store, clock) = store();
        let taken = NewInvitation::new("other@x.com", Uuid::new_v4(), None);
        store.create_invite(&taken).await.unwrap();

        let mut colliding = NewInvitation::new("a@x.com", Uuid::new_v4(), None);
        colliding.code = taken.code.clone();

        let issued = OrchestratedIssuance::new(3)
            .issue(&store, colliding)
            .await
            .unwrap();
        assert_ne!(issued.record.code, taken.code);
        assert_eq!(issued.record.created_at, clock.now());
    }

    #[tokio::test]
    async fn test_orchestrated_gives_up_after_retries() {
        let (store, clock) = store();
        let taken = NewInvitation::new("other@x.com", Uuid::new_v4(), None);
        store.create_invite(&taken).await.unwrap();

        // Same id as an existing row conflicts regardless of the code.
        let mut colliding = NewInvitation::new("a@x.com", Uuid::new_v4(), None);
        colliding.id = taken.id;
        let err = OrchestratedIssuance::new(2)
            .issue(&store, colliding)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let records: Vec<InvitationRecord> = store.all().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_valid_at(clock.now()));
    }

    #[tokio::test]
    async fn test_atomic_delegates_to_store() {
        let (store, _) = store();
        let issued = AtomicIssuance
            .issue(&store, NewInvitation::new("a@x.com", Uuid::new_v4(), None))
            .await
            .unwrap();
        assert!(!issued.renewed);
        assert_eq!(AtomicIssuance.name(), "atomic");
    }
}
