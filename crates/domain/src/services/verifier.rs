//! Resolves the mentor a registering client was invited by.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::invitation_store::InvitationStore;
use crate::models::{normalize_invite_code, InvitationRecord};
use shared::validation::non_blank;

pub const REASON_MISSING_INPUT: &str = "missing verification input";
pub const REASON_NO_INVITATION: &str = "no valid invitation found";
pub const REASON_NO_INVITATION_FOR_EMAIL: &str = "no valid invitation for email";

/// Proof of invitation presented at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyInvite {
    pub code: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Code,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct VerifiedInvitation {
    pub mentor_id: Uuid,
    pub invitation_id: Uuid,
    pub code: String,
    pub email: String,
    pub matched_by: MatchedBy,
}

impl VerifiedInvitation {
    fn from_record(record: InvitationRecord, matched_by: MatchedBy) -> Self {
        Self {
            mentor_id: record.mentor_id,
            invitation_id: record.id,
            code: record.code,
            email: record.email,
            matched_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Verified(VerifiedInvitation),
    Failed { reason: String },
}

impl VerificationResult {
    fn failed(reason: &str) -> Self {
        VerificationResult::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified(_))
    }
}

pub struct InvitationVerifier {
    store: Arc<dyn InvitationStore>,
}

impl InvitationVerifier {
    pub fn new(store: Arc<dyn InvitationStore>) -> Self {
        Self { store }
    }

    /// Tries the code first, then the email. Each call is a fresh attempt.
    pub async fn verify_invite(&self, input: &VerifyInvite) -> VerificationResult {
        let code = input.code.as_deref().and_then(non_blank);
        let email = input.email.as_deref().and_then(non_blank);

        if code.is_none() && email.is_none() {
            return VerificationResult::failed(REASON_MISSING_INPUT);
        }

        if let Some(code) = code {
            let code = normalize_invite_code(code);
            match self.store.resolve_by_code(&code, None).await {
                Ok(Some(record)) => {
                    debug!(invitation_id = %record.id, "Invitation verified by code");
                    return VerificationResult::Verified(VerifiedInvitation::from_record(
                        record,
                        MatchedBy::Code,
                    ));
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Invitation lookup by code failed"),
            }

            if email.is_none() {
                return VerificationResult::failed(REASON_NO_INVITATION);
            }
        }

        let Some(email) = email else {
            return VerificationResult::failed(REASON_NO_INVITATION);
        };

        match self.store.resolve_by_email(email).await {
            Ok(Some(record)) => {
                debug!(invitation_id = %record.id, "Invitation verified by email");
                VerificationResult::Verified(VerifiedInvitation::from_record(
                    record,
                    MatchedBy::Email,
                ))
            }
            Ok(None) => VerificationResult::failed(REASON_NO_INVITATION_FOR_EMAIL),
            Err(err) => {
                warn!(error = %err, "Invitation lookup by email failed");
                VerificationResult::failed(REASON_NO_INVITATION_FOR_EMAIL)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewInvitation;
    use crate::services::clock::ManualClock;
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;

    fn setup() -> (Arc<InMemoryInvitationStore>, InvitationVerifier, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryInvitationStore::new(Arc::new(clock.clone())));
        let verifier = InvitationVerifier::new(store.clone());
        (store, verifier, clock)
    }

    fn input(code: Option<&str>, email: Option<&str>) -> VerifyInvite {
        VerifyInvite {
            code: code.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_missing_input() {
        let (_, verifier, _) = setup();
        assert_eq!(
            verifier.verify_invite(&input(None, Some("  "))).await,
            VerificationResult::Failed {
                reason: REASON_MISSING_INPUT.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_verify_by_code_normalises_input() {
        let (store, verifier, _) = setup();
        let mentor = Uuid::new_v4();
        let record = store
            .create_invite(&NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();

        let typed = format!("  {} ", record.code.to_lowercase());
        match verifier.verify_invite(&input(Some(&typed), None)).await {
            VerificationResult::Verified(v) => {
                assert_eq!(v.mentor_id, mentor);
                assert_eq!(v.invitation_id, record.id);
                assert_eq!(v.matched_by, MatchedBy::Code);
            }
            other => panic!("expected verified, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_code_falls_through_to_email() {
        let (store, verifier, _) = setup();
        let mentor = Uuid::new_v4();
        store
            .create_invite(&NewInvitation::new("a@x.com", mentor, None))
            .await
            .unwrap();

        let result = verifier
            .verify_invite(&input(Some("ZZZ-ZZZ-ZZZ"), Some("a@x.com")))
            .await;
        match result {
            VerificationResult::Verified(v) => assert_eq!(v.matched_by, MatchedBy::Email),
            other => panic!("expected verified, got {:?}", other),
        }

        let result = verifier.verify_invite(&input(Some("ZZZ-ZZZ-ZZZ"), None)).await;
        assert_eq!(
            result,
            VerificationResult::Failed {
                reason: REASON_NO_INVITATION.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_expired_invitation_fails() {
        let (store, verifier, clock) = setup();
        let record = store
            .create_invite(&NewInvitation::new("a@x.com", Uuid::new_v4(), None))
            .await
            .unwrap();
        clock.advance(Duration::days(7) + Duration::seconds(1));

        let by_email = verifier.verify_invite(&input(None, Some("a@x.com"))).await;
        assert_eq!(
            by_email,
            VerificationResult::Failed {
                reason: REASON_NO_INVITATION_FOR_EMAIL.to_string()
            }
        );

        let by_code = verifier.verify_invite(&input(Some(&record.code), None)).await;
        assert!(!by_code.is_verified());
    }

    #[tokio::test]
    async fn test_used_invitation_fails() {
        let (store, verifier, _) = setup();
        let record = store
            .create_invite(&NewInvitation::new("a@x.com", Uuid::new_v4(), None))
            .await
            .unwrap();
        store.mark_used(record.id, Uuid::new_v4()).await.unwrap();

        let result = verifier
            .verify_invite(&input(Some(&record.code), Some("a@x.com")))
            .await;
        assert_eq!(
            result,
            VerificationResult::Failed {
                reason: REASON_NO_INVITATION_FOR_EMAIL.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_store_errors_read_as_not_found() {
        let (store, verifier, _) = setup();
        store.set_offline(true);

        let result = verifier
            .verify_invite(&input(Some("ABC-DEF-GHJ"), Some("a@x.com")))
            .await;
        assert_eq!(
            result,
            VerificationResult::Failed {
                reason: REASON_NO_INVITATION_FOR_EMAIL.to_string()
            }
        );
    }
}
