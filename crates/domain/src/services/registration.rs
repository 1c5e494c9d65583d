//! Post-signup bookkeeping for invited clients.
//!
//! Runs after the hosted auth provider created the account. Consuming the
//! invitation and linking the mentor are best-effort: failures become
//! warnings in the [`CompletionReport`] and the account stands.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::invitation_store::{InvitationStore, ProfileStore, StoreError};
use crate::models::{normalize_invite_code, AccountSignup, InviteRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("An account with this email already exists")]
    AlreadyRegistered,

    #[error("Signup rejected: {0}")]
    Rejected(String),

    #[error("Auth provider unavailable: {0}")]
    Unavailable(String),
}

/// External account creation.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// Creates the account and returns its identifier.
    async fn create_account(&self, signup: &AccountSignup) -> Result<Uuid, AccountError>;
}

/// Non-fatal bookkeeping failure after signup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkageError {
    #[error("Invitation could not be marked as used: {0}")]
    InvitationNotConsumed(String),

    #[error("Mentor could not be linked to the account: {0}")]
    MentorNotLinked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CompletionReport {
    pub account_id: Uuid,
    pub mentor_id: Uuid,
    pub consumed_invitation: Option<Uuid>,
    pub mentor_linked: bool,
    #[serde(skip)]
    pub warnings: Vec<LinkageError>,
}

impl CompletionReport {
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

pub struct RegistrationCompletion {
    invitations: Arc<dyn InvitationStore>,
    profiles: Arc<dyn ProfileStore>,
}

impl RegistrationCompletion {
    pub fn new(invitations: Arc<dyn InvitationStore>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            invitations,
            profiles,
        }
    }

    /// Marks the invitation consumed and links the account to its mentor.
    ///
    /// Without `invite_ref`, the latest unused invitation for
    /// (`email`, `mentor_id`) is consumed.
    pub async fn complete_registration(
        &self,
        account_id: Uuid,
        email: &str,
        invite_ref: Option<InviteRef>,
        mentor_id: Uuid,
    ) -> CompletionReport {
        let mut warnings = Vec::new();

        let consumed_invitation = match self.consume(account_id, email, invite_ref, mentor_id).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(
                    account_id = %account_id,
                    mentor_id = %mentor_id,
                    error = %err,
                    "Registration completed without consuming the invitation"
                );
                warnings.push(err);
                None
            }
        };

        let mentor_linked = match self
            .profiles
            .assign_mentor(account_id, email, mentor_id)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    account_id = %account_id,
                    mentor_id = %mentor_id,
                    error = %err,
                    "Registration completed without linking the mentor"
                );
                warnings.push(LinkageError::MentorNotLinked(err.to_string()));
                false
            }
        };

        info!(
            account_id = %account_id,
            mentor_id = %mentor_id,
            invitation_id = ?consumed_invitation,
            mentor_linked,
            "Client registration completed"
        );

        CompletionReport {
            account_id,
            mentor_id,
            consumed_invitation,
            mentor_linked,
            warnings,
        }
    }

    async fn consume(
        &self,
        account_id: Uuid,
        email: &str,
        invite_ref: Option<InviteRef>,
        mentor_id: Uuid,
    ) -> Result<Uuid, LinkageError> {
        let not_consumed = |err: StoreError| LinkageError::InvitationNotConsumed(err.to_string());

        let id = match invite_ref {
            Some(InviteRef::Id(id)) => id,
            Some(InviteRef::Code(code)) => {
                let code = normalize_invite_code(&code);
                self.invitations
                    .resolve_by_code(&code, None)
                    .await
                    .map_err(not_consumed)?
                    .map(|r| r.id)
                    .ok_or_else(|| {
                        LinkageError::InvitationNotConsumed(format!(
                            "no valid invitation with code {}",
                            code
                        ))
                    })?
            }
            None => self
                .invitations
                .latest_unused_for_email(email.trim(), mentor_id)
                .await
                .map_err(not_consumed)?
                .map(|r| r.id)
                .ok_or_else(|| {
                    LinkageError::InvitationNotConsumed(
                        "no unused invitation for this email".to_string(),
                    )
                })?,
        };

        self.invitations
            .mark_used(id, account_id)
            .await
            .map_err(not_consumed)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mentor, NewInvitation};
    use crate::services::clock::{Clock, ManualClock};
    use crate::services::dispatcher::{DispatcherSettings, EmailDispatcher, MockEmailProvider};
    use crate::services::issuer::{InvitationIssuer, IssuerSettings};
    use crate::services::memory::{InMemoryInvitationStore, InMemoryProfileStore};
    use crate::services::verifier::{InvitationVerifier, VerificationResult, VerifyInvite};
    use chrono::Duration;

    struct Fixture {
        store: Arc<InMemoryInvitationStore>,
        profiles: Arc<InMemoryProfileStore>,
        completion: RegistrationCompletion,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryInvitationStore::new(Arc::new(clock.clone())));
        let profiles = Arc::new(InMemoryProfileStore::new());
        let completion = RegistrationCompletion::new(store.clone(), profiles.clone());
        Fixture {
            store,
            profiles,
            completion,
            clock,
        }
    }

    #[tokio::test]
    async fn test_issue_verify_complete_scenario() {
        let f = fixture();
        let mentor = Mentor {
            id: Uuid::new_v4(),
            display_name: "M1".to_string(),
            email: None,
        };
        let dispatcher = Arc::new(EmailDispatcher::new(
            Arc::new(MockEmailProvider::new("resend")),
            DispatcherSettings::default(),
        ));
        let issuer = InvitationIssuer::new(
            f.store.clone(),
            dispatcher,
            Arc::new(f.clock.clone()),
            IssuerSettings::default(),
        );

        let issued = issuer.issue_invite("a@x.com", "Ada", &mentor).await.unwrap();
        assert!(!issued.invitation.is_used);
        assert_eq!(
            issued.invitation.expires_at,
            f.clock.now() + Duration::days(7)
        );

        let verifier = InvitationVerifier::new(f.store.clone());
        let verified = match verifier
            .verify_invite(&VerifyInvite {
                code: None,
                email: Some("a@x.com".to_string()),
            })
            .await
        {
            VerificationResult::Verified(v) => v,
            other => panic!("expected verified, got {:?}", other),
        };
        assert_eq!(verified.mentor_id, mentor.id);

        let account = Uuid::new_v4();
        let report = f
            .completion
            .complete_registration(
                account,
                "a@x.com",
                Some(InviteRef::Id(verified.invitation_id)),
                verified.mentor_id,
            )
            .await;
        assert!(report.warnings.is_empty());
        assert!(report.mentor_linked);
        assert_eq!(report.consumed_invitation, Some(issued.invitation.id));

        let record = f.store.find_by_id(issued.invitation.id).await.unwrap().unwrap();
        assert!(record.is_used);
        assert_eq!(record.used_by, Some(account));
        assert_eq!(f.profiles.mentor_of(account).await, Some(mentor.id));
    }

    #[tokio::test]
    async fn test_complete_by_code() {
        let f = fixture();
        let mentor = Uuid::new_v4();
        let record = f
            .store
            .create_invite(&NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();

        let account = Uuid::new_v4();
        let report = f
            .completion
            .complete_registration(
                account,
                "a@x.com",
                Some(InviteRef::Code(record.code.to_lowercase())),
                mentor,
            )
            .await;
        assert_eq!(report.consumed_invitation, Some(record.id));
    }

    #[tokio::test]
    async fn test_fallback_marks_latest_unused_for_pair() {
        let f = fixture();
        let mentor = Uuid::new_v4();
        let other_mentor = Uuid::new_v4();

        let older = f
            .store
            .create_invite(&NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        f.clock.advance(Duration::days(8));
        let newer = f
            .store
            .create_invite(&NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));
        let foreign = f
            .store
            .create_invite(&NewInvitation::new("a@x.com", other_mentor, None))
            .await
            .unwrap();

        let report = f
            .completion
            .complete_registration(Uuid::new_v4(), " a@x.com ", None, mentor)
            .await;
        assert_eq!(report.consumed_invitation, Some(newer.id));

        let older = f.store.find_by_id(older.id).await.unwrap().unwrap();
        let foreign = f.store.find_by_id(foreign.id).await.unwrap().unwrap();
        assert!(!older.is_used);
        assert!(!foreign.is_used);
    }

    #[tokio::test]
    async fn test_mark_used_is_idempotent_for_same_account() {
        let f = fixture();
        let mentor = Uuid::new_v4();
        let record = f
            .store
            .create_invite(&NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();
        let account = Uuid::new_v4();

        for _ in 0..2 {
            let report = f
                .completion
                .complete_registration(account, "a@x.com", Some(InviteRef::Id(record.id)), mentor)
                .await;
            assert!(report.warnings.is_empty());
        }

        let report = f
            .completion
            .complete_registration(Uuid::new_v4(), "a@x.com", Some(InviteRef::Id(record.id)), mentor)
            .await;
        assert_eq!(report.consumed_invitation, None);
        assert!(matches!(
            report.warnings[0],
            LinkageError::InvitationNotConsumed(_)
        ));

        let stored = f.store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.used_by, Some(account));
    }

    #[tokio::test]
    async fn test_failures_become_warnings() {
        let f = fixture();
        f.profiles.set_offline(true);

        let report = f
            .completion
            .complete_registration(Uuid::new_v4(), "nobody@x.com", None, Uuid::new_v4())
            .await;
        assert_eq!(report.consumed_invitation, None);
        assert!(!report.mentor_linked);
        assert_eq!(report.warnings.len(), 2);
        assert!(matches!(
            report.warnings[0],
            LinkageError::InvitationNotConsumed(_)
        ));
        assert!(matches!(report.warnings[1], LinkageError::MentorNotLinked(_)));
        assert_eq!(report.warning_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_invitation_id_still_links_mentor() {
        let f = fixture();
        let account = Uuid::new_v4();
        let mentor = Uuid::new_v4();

        let report = f
            .completion
            .complete_registration(account, "a@x.com", Some(InviteRef::Id(Uuid::new_v4())), mentor)
            .await;
        assert!(report.mentor_linked);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(f.profiles.mentor_of(account).await, Some(mentor));
    }
}
