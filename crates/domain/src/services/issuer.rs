//! Invitation issuance: validate, persist, then notify.
//!
//! Persistence failure fails the call. Delivery failure does not: the
//! invitation exists and can be resent, so the result carries the delivery
//! detail with [`IssueOutcome::DeliveryFailed`].

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::dispatcher::{EmailDispatcher, InviteNotice};
use super::invitation_store::{InvitationStore, IssuedInvitation, StoreError};
use super::issuance::{
    AtomicIssuance, IssuanceStrategy, OrchestratedIssuance, DEFAULT_MAX_CODE_RETRIES,
};
use crate::models::{DispatchResult, InvitationRecord, InvitationSummary, Mentor, NewInvitation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    #[error("{0}")]
    Validation(String),

    #[error("Invitation could not be saved: {0}")]
    Persistence(String),

    #[error("Invitation not found")]
    NotFound,

    #[error("Invitation has already been used")]
    AlreadyUsed,
}

impl From<StoreError> for IssueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => IssueError::NotFound,
            StoreError::AlreadyUsed { .. } => IssueError::AlreadyUsed,
            other => IssueError::Persistence(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueOutcome {
    Delivered,
    /// Saved, but the email did not go out.
    DeliveryFailed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct IssueResult {
    pub invitation: InvitationRecord,
    pub renewed: bool,
    /// Issuance path that persisted the invitation.
    pub issued_via: String,
    pub registration_link: String,
    pub delivery: DispatchResult,
    pub outcome: IssueOutcome,
}

#[derive(Debug, Clone, Copy)]
pub struct IssuerSettings {
    /// Prefer the store's server-side insert-or-renew.
    pub atomic_issuance: bool,
    pub max_code_retries: u32,
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self {
            atomic_issuance: true,
            max_code_retries: DEFAULT_MAX_CODE_RETRIES,
        }
    }
}

pub struct InvitationIssuer {
    store: Arc<dyn InvitationStore>,
    dispatcher: Arc<EmailDispatcher>,
    clock: Arc<dyn Clock>,
    atomic: Option<AtomicIssuance>,
    orchestrated: OrchestratedIssuance,
}

impl InvitationIssuer {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        dispatcher: Arc<EmailDispatcher>,
        clock: Arc<dyn Clock>,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            atomic: settings.atomic_issuance.then_some(AtomicIssuance),
            orchestrated: OrchestratedIssuance::new(settings.max_code_retries),
        }
    }

    /// Creates an invitation for the pair, or renews the valid one, and
    /// emails it.
    pub async fn issue_invite(
        &self,
        email: &str,
        name: &str,
        mentor: &Mentor,
    ) -> Result<IssueResult, IssueError> {
        let (email, name) = validate_issue_input(email, name, mentor)?;

        let invitation = NewInvitation::new(email.clone(), mentor.id, Some(name.clone()));
        let (issued, issued_via) = self.persist(invitation).await?;

        info!(
            invitation_id = %issued.record.id,
            mentor_id = %mentor.id,
            renewed = issued.renewed,
            path = issued_via,
            "Invitation issued"
        );

        let notice = InviteNotice {
            email,
            name,
            mentor_name: mentor.display_name.clone(),
            code: Some(issued.record.code.clone()),
        };
        Ok(self
            .notify(issued.record, issued.renewed, issued_via, &notice)
            .await)
    }

    /// Renews an unused invitation of `mentor` and emails it again.
    ///
    /// When a newer invitation for the same recipient is still valid, that
    /// one is resent instead, so the pair never holds two valid codes.
    pub async fn resend_invite(
        &self,
        invitation_id: Uuid,
        mentor: &Mentor,
    ) -> Result<IssueResult, IssueError> {
        let record = self
            .store
            .find_by_id(invitation_id)
            .await?
            .filter(|r| r.mentor_id == mentor.id)
            .ok_or(IssueError::NotFound)?;

        if record.is_used {
            return Err(IssueError::AlreadyUsed);
        }

        let target = match self.store.find_valid_invite(&record.email, mentor.id).await? {
            Some(current) if current.id != record.id => {
                info!(
                    requested_id = %record.id,
                    invitation_id = %current.id,
                    "Resending the recipient's current invitation instead"
                );
                current.id
            }
            _ => record.id,
        };

        let id = self.store.renew_invite(target).await?;
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(IssueError::NotFound)?;

        info!(
            invitation_id = %record.id,
            mentor_id = %mentor.id,
            expires_at = %record.expires_at,
            "Invitation renewed for resend"
        );

        let notice = InviteNotice {
            email: record.email.clone(),
            name: record
                .invitee_name
                .clone()
                .unwrap_or_else(|| record.email.clone()),
            mentor_name: mentor.display_name.clone(),
            code: Some(record.code.clone()),
        };
        Ok(self.notify(record, true, "resend", &notice).await)
    }

    /// Every invitation of the mentor, newest first, with derived status.
    pub async fn invitation_history(
        &self,
        mentor_id: Uuid,
    ) -> Result<Vec<InvitationSummary>, IssueError> {
        let now = self.clock.now();
        let records = self.store.list_for_mentor(mentor_id).await?;
        Ok(records
            .into_iter()
            .map(|r| InvitationSummary::from_record(r, now))
            .collect())
    }

    async fn persist(
        &self,
        invitation: NewInvitation,
    ) -> Result<(IssuedInvitation, &'static str), IssueError> {
        if let Some(atomic) = &self.atomic {
            match atomic.issue(self.store.as_ref(), invitation.clone()).await {
                Ok(issued) => return Ok((issued, atomic.name())),
                Err(StoreError::Unavailable) => {
                    warn!("Atomic issuance unavailable, using orchestrated issuance");
                }
                Err(err) => {
                    warn!(error = %err, "Atomic issuance failed, using orchestrated issuance");
                }
            }
        }

        let issued = self
            .orchestrated
            .issue(self.store.as_ref(), invitation)
            .await
            .map_err(|err| IssueError::Persistence(err.to_string()))?;
        Ok((issued, self.orchestrated.name()))
    }

    async fn notify(
        &self,
        invitation: InvitationRecord,
        renewed: bool,
        issued_via: &str,
        notice: &InviteNotice,
    ) -> IssueResult {
        let delivery = self.dispatcher.send_invite(notice).await;
        let outcome = if delivery.success {
            IssueOutcome::Delivered
        } else {
            warn!(
                invitation_id = %invitation.id,
                failure = ?delivery.failure,
                "Invitation saved but email delivery failed"
            );
            IssueOutcome::DeliveryFailed
        };

        IssueResult {
            registration_link: self
                .dispatcher
                .registration_link(&invitation.email, Some(&invitation.code)),
            invitation,
            renewed,
            issued_via: issued_via.to_string(),
            delivery,
            outcome,
        }
    }
}

fn validate_issue_input(
    email: &str,
    name: &str,
    mentor: &Mentor,
) -> Result<(String, String), IssueError> {
    let message = |err: validator::ValidationError| {
        err.message
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.code.to_string())
    };

    shared::validation::validate_email_address(email).map_err(|e| IssueError::Validation(message(e)))?;
    shared::validation::validate_display_name(name).map_err(|e| IssueError::Validation(message(e)))?;

    if mentor.id.is_nil() {
        return Err(IssueError::Validation(
            "Mentor identifier is required".to_string(),
        ));
    }

    Ok((email.trim().to_string(), name.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryFailureKind, InvitationStatus};
    use crate::services::clock::ManualClock;
    use crate::services::dispatcher::{DispatcherSettings, MockEmailProvider, ProviderError};
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;

    struct Fixture {
        issuer: InvitationIssuer,
        store: Arc<InMemoryInvitationStore>,
        provider: Arc<MockEmailProvider>,
        clock: ManualClock,
        mentor: Mentor,
    }

    fn fixture_with(store: InMemoryInvitationStore, clock: ManualClock, settings: IssuerSettings) -> Fixture {
        let store = Arc::new(store);
        let provider = Arc::new(MockEmailProvider::new("resend"));
        let dispatcher = Arc::new(EmailDispatcher::new(
            provider.clone(),
            DispatcherSettings::default(),
        ));
        let issuer = InvitationIssuer::new(
            store.clone(),
            dispatcher,
            Arc::new(clock.clone()),
            settings,
        );
        Fixture {
            issuer,
            store,
            provider,
            clock,
            mentor: Mentor {
                id: Uuid::new_v4(),
                display_name: "Grace".to_string(),
                email: None,
            },
        }
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let store = InMemoryInvitationStore::new(Arc::new(clock.clone()));
        fixture_with(store, clock, IssuerSettings::default())
    }

    #[tokio::test]
    async fn test_issue_creates_record() {
        let f = fixture();
        let result = f.issuer.issue_invite(" a@x.com ", "Ada", &f.mentor).await.unwrap();

        assert_eq!(result.outcome, IssueOutcome::Delivered);
        assert!(!result.renewed);
        assert_eq!(result.issued_via, "atomic");
        assert_eq!(result.invitation.email, "a@x.com");
        assert!(!result.invitation.is_used);
        assert_eq!(
            result.invitation.expires_at,
            f.clock.now() + Duration::days(7)
        );
        assert!(result.registration_link.contains("email=a%40x.com"));
        assert_eq!(f.provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_issue_twice_renews_same_record() {
        let f = fixture();
        let first = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        let second = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();

        assert!(second.renewed);
        assert_eq!(second.invitation.id, first.invitation.id);
        assert_eq!(second.invitation.code, first.invitation.code);
        assert!(second.invitation.expires_at > first.invitation.expires_at);

        let now = f.clock.now();
        let valid = f.store.all().await.into_iter().filter(|r| r.is_valid_at(now)).count();
        assert_eq!(valid, 1);
    }

    #[tokio::test]
    async fn test_issue_falls_back_to_orchestrated() {
        let clock = ManualClock::starting_now();
        let store = InMemoryInvitationStore::new(Arc::new(clock.clone())).without_atomic_issue();
        let f = fixture_with(store, clock, IssuerSettings::default());

        let first = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        assert_eq!(first.issued_via, "orchestrated");

        f.clock.advance(Duration::seconds(1));
        let second = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        assert_eq!(second.invitation.id, first.invitation.id);
        assert!(second.renewed);
    }

    #[tokio::test]
    async fn test_orchestrated_only_when_atomic_disabled() {
        let clock = ManualClock::starting_now();
        let store = InMemoryInvitationStore::new(Arc::new(clock.clone()));
        let settings = IssuerSettings {
            atomic_issuance: false,
            ..IssuerSettings::default()
        };
        let f = fixture_with(store, clock, settings);

        let result = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        assert_eq!(result.issued_via, "orchestrated");
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture();

        let err = f.issuer.issue_invite("   ", "Ada", &f.mentor).await.unwrap_err();
        assert_eq!(err, IssueError::Validation("Email is required".to_string()));

        let err = f.issuer.issue_invite("not-an-email", "Ada", &f.mentor).await.unwrap_err();
        assert_eq!(err, IssueError::Validation("Email address is not valid".to_string()));

        let err = f.issuer.issue_invite("a@x.com", " ", &f.mentor).await.unwrap_err();
        assert_eq!(err, IssueError::Validation("Name is required".to_string()));

        let nil_mentor = Mentor {
            id: Uuid::nil(),
            ..f.mentor.clone()
        };
        let err = f.issuer.issue_invite("a@x.com", "Ada", &nil_mentor).await.unwrap_err();
        assert!(matches!(err, IssueError::Validation(_)));

        assert!(f.store.all().await.is_empty());
        assert!(f.provider.sent().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_fatal() {
        let f = fixture();
        f.store.set_offline(true);

        let err = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap_err();
        assert!(matches!(err, IssueError::Persistence(_)));
        assert!(f.provider.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_record_and_resend_recovers() {
        let f = fixture();
        f.provider.set_failure(Some(ProviderError::new(
            Some(403),
            "You can only send testing emails. Please verify a domain",
        )));

        let issued = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        assert_eq!(issued.outcome, IssueOutcome::DeliveryFailed);
        assert!(issued.delivery.is_domain_error);
        assert_eq!(
            issued.delivery.failure,
            Some(DeliveryFailureKind::DomainNotVerified)
        );

        let stored = f.store.find_by_id(issued.invitation.id).await.unwrap().unwrap();
        assert!(stored.is_valid_at(f.clock.now()));

        f.provider.set_failure(None);
        f.clock.advance(Duration::hours(1));
        let resent = f.issuer.resend_invite(issued.invitation.id, &f.mentor).await.unwrap();
        assert_eq!(resent.outcome, IssueOutcome::Delivered);
        assert_eq!(resent.invitation.id, issued.invitation.id);
        assert_eq!(resent.issued_via, "resend");
        assert_eq!(f.provider.sent().len(), 1);
        assert!(f.provider.sent()[0].html.contains("Ada"));
    }

    #[tokio::test]
    async fn test_resend_rules() {
        let f = fixture();
        let issued = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();

        let stranger = Mentor {
            id: Uuid::new_v4(),
            display_name: "Other".to_string(),
            email: None,
        };
        let err = f.issuer.resend_invite(issued.invitation.id, &stranger).await.unwrap_err();
        assert_eq!(err, IssueError::NotFound);

        let err = f.issuer.resend_invite(Uuid::new_v4(), &f.mentor).await.unwrap_err();
        assert_eq!(err, IssueError::NotFound);

        f.store.mark_used(issued.invitation.id, Uuid::new_v4()).await.unwrap();
        let err = f.issuer.resend_invite(issued.invitation.id, &f.mentor).await.unwrap_err();
        assert_eq!(err, IssueError::AlreadyUsed);
    }

    #[tokio::test]
    async fn test_resend_revives_expired_invitation() {
        let f = fixture();
        let issued = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        f.clock.advance(Duration::days(8));

        let resent = f.issuer.resend_invite(issued.invitation.id, &f.mentor).await.unwrap();
        assert!(resent.invitation.is_valid_at(f.clock.now()));
        assert_eq!(resent.invitation.id, issued.invitation.id);
    }

    #[tokio::test]
    async fn test_resend_of_superseded_invitation_keeps_one_valid() {
        let f = fixture();
        let first = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        f.clock.advance(Duration::days(8));
        let second = f.issuer.issue_invite("a@x.com", "Ada", &f.mentor).await.unwrap();
        assert_ne!(second.invitation.id, first.invitation.id);

        let resent = f.issuer.resend_invite(first.invitation.id, &f.mentor).await.unwrap();
        assert_eq!(resent.invitation.id, second.invitation.id);
        assert_eq!(resent.invitation.code, second.invitation.code);

        let now = f.clock.now();
        let valid: Vec<Uuid> = f
            .store
            .all()
            .await
            .into_iter()
            .filter(|r| r.email == "a@x.com" && r.is_valid_at(now))
            .map(|r| r.id)
            .collect();
        assert_eq!(valid, vec![second.invitation.id]);

        // The superseded code stays dead once the current one is consumed.
        f.store.mark_used(second.invitation.id, Uuid::new_v4()).await.unwrap();
        let stale = f.store.resolve_by_code(&first.invitation.code, None).await.unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_history_statuses() {
        let f = fixture();
        let used = f.issuer.issue_invite("used@x.com", "U", &f.mentor).await.unwrap();
        f.store.mark_used(used.invitation.id, Uuid::new_v4()).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        f.issuer.issue_invite("old@x.com", "O", &f.mentor).await.unwrap();
        f.clock.advance(Duration::days(8));
        f.issuer.issue_invite("new@x.com", "N", &f.mentor).await.unwrap();

        let history = f.issuer.invitation_history(f.mentor.id).await.unwrap();
        let statuses: Vec<(String, InvitationStatus)> =
            history.into_iter().map(|s| (s.email, s.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("new@x.com".to_string(), InvitationStatus::Pending),
                ("old@x.com".to_string(), InvitationStatus::Expired),
                ("used@x.com".to_string(), InvitationStatus::Used),
            ]
        );

        assert!(f.issuer.invitation_history(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
