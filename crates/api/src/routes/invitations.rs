//! Client invitation routes: issue, history, resend and verify.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::{
    DispatchResult, IssueInvitationRequest, ListInvitationsResponse, Mentor,
    VerifyInvitationQuery,
};
use domain::services::{IssueResult, VerificationResult, VerifiedInvitation, VerifyInvite};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::metrics::{
    record_invitation_email, record_invitation_issued, record_verification,
};

/// Issue or resend result with a recovery hint when the email did not go out.
#[derive(Debug, Serialize)]
pub struct IssueInvitationResponse {
    #[serde(flatten)]
    pub result: IssueResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<&'static str>,
}

impl From<IssueResult> for IssueInvitationResponse {
    fn from(result: IssueResult) -> Self {
        let remediation = result.delivery.remediation_hint();
        Self {
            result,
            remediation,
        }
    }
}

/// Verification outcome for the registration page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct VerifyInvitationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation: Option<VerifiedInvitation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

async fn find_mentor(state: &AppState, mentor_id: Uuid) -> Result<Mentor, ApiError> {
    state
        .services
        .profiles
        .find_mentor(mentor_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Mentor not found".to_string()))
}

fn record_delivery(delivery: &DispatchResult) {
    for attempt in &delivery.attempts {
        let outcome = match attempt.failure {
            Some(kind) => kind.to_string(),
            None => "delivered".to_string(),
        };
        record_invitation_email(&attempt.provider, &outcome);
    }
}

/// Invite a client by email.
///
/// POST /api/v1/mentors/:mentor_id/invitations
///
/// Returns 201 once the invitation is saved, even if the email failed;
/// the delivery detail and a remediation hint are in the body.
pub async fn issue_invitation(
    State(state): State<AppState>,
    Path(mentor_id): Path<Uuid>,
    Json(request): Json<IssueInvitationRequest>,
) -> Result<(StatusCode, Json<IssueInvitationResponse>), ApiError> {
    let mentor = find_mentor(&state, mentor_id).await?;

    let result = state
        .services
        .issuer
        .issue_invite(&request.email, &request.name, &mentor)
        .await?;

    record_invitation_issued(&result.issued_via, result.renewed);
    record_delivery(&result.delivery);

    info!(
        mentor_id = %mentor_id,
        invitation_id = %result.invitation.id,
        outcome = ?result.outcome,
        "Invitation request handled"
    );

    Ok((StatusCode::CREATED, Json(result.into())))
}

/// List a mentor's invitations, newest first.
///
/// GET /api/v1/mentors/:mentor_id/invitations
pub async fn list_invitations(
    State(state): State<AppState>,
    Path(mentor_id): Path<Uuid>,
) -> Result<Json<ListInvitationsResponse>, ApiError> {
    let mentor = find_mentor(&state, mentor_id).await?;
    let data = state.services.issuer.invitation_history(mentor.id).await?;
    Ok(Json(ListInvitationsResponse { data }))
}

/// Renew an unused invitation and email it again.
///
/// POST /api/v1/mentors/:mentor_id/invitations/:invitation_id/resend
pub async fn resend_invitation(
    State(state): State<AppState>,
    Path((mentor_id, invitation_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<IssueInvitationResponse>, ApiError> {
    let mentor = find_mentor(&state, mentor_id).await?;

    let result = state
        .services
        .issuer
        .resend_invite(invitation_id, &mentor)
        .await?;

    record_invitation_issued(&result.issued_via, result.renewed);
    record_delivery(&result.delivery);

    Ok(Json(result.into()))
}

/// Check an invitation link before showing the registration form.
///
/// GET /api/v1/invitations/verify?code=&email=
///
/// A missing or unknown invitation is a normal outcome, reported as
/// `valid: false` with a reason.
pub async fn verify_invitation(
    State(state): State<AppState>,
    Query(query): Query<VerifyInvitationQuery>,
) -> Json<VerifyInvitationResponse> {
    let input = VerifyInvite {
        code: query.code,
        email: query.email,
    };

    let response = match state.services.verifier.verify_invite(&input).await {
        VerificationResult::Verified(invitation) => {
            record_verification(match invitation.matched_by {
                domain::services::MatchedBy::Code => "code",
                domain::services::MatchedBy::Email => "email",
            });
            VerifyInvitationResponse {
                valid: true,
                invitation: Some(invitation),
                reason: None,
            }
        }
        VerificationResult::Failed { reason } => {
            record_verification("failed");
            VerifyInvitationResponse {
                valid: false,
                invitation: None,
                reason: Some(reason),
            }
        }
    };

    Json(response)
}
