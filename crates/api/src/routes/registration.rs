//! Client registration through an invitation.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::{
    AccountSignup, InvitationRole, InviteRef, RegisterClientRequest, RegisterClientResponse,
};
use domain::services::{MatchedBy, VerificationResult, VerifyInvite};
use tracing::{info, warn};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::metrics::record_verification;

/// Register a client account for an invited email.
///
/// POST /api/v1/registrations
///
/// The invitation is verified before the account is created. Once the auth
/// provider created the account, the call succeeds; failing to consume the
/// invitation or link the mentor is reported in `warnings`.
pub async fn register_client(
    State(state): State<AppState>,
    Json(request): Json<RegisterClientRequest>,
) -> Result<(StatusCode, Json<RegisterClientResponse>), ApiError> {
    request.validate()?;

    let email = request.email.trim().to_string();
    let verification = state
        .services
        .verifier
        .verify_invite(&VerifyInvite {
            code: request.code.clone(),
            email: Some(email.clone()),
        })
        .await;

    let invitation = match verification {
        VerificationResult::Verified(invitation) => invitation,
        VerificationResult::Failed { reason } => {
            record_verification("failed");
            warn!(reason = %reason, "Registration without a valid invitation");
            return Err(ApiError::Validation(format!(
                "A valid invitation is required to register: {}",
                reason
            )));
        }
    };

    // A code match consumes that code; an email match falls back to the
    // latest unused invitation for the email and mentor.
    let invite_ref = match invitation.matched_by {
        MatchedBy::Code => {
            record_verification("code");
            Some(InviteRef::Code(invitation.code.clone()))
        }
        MatchedBy::Email => {
            record_verification("email");
            None
        }
    };

    let signup = AccountSignup {
        email: email.clone(),
        password: request.password,
        full_name: request.full_name.trim().to_string(),
        role: InvitationRole::Client,
        mentor_id: invitation.mentor_id,
    };
    let account_id = state.services.accounts.create_account(&signup).await?;

    let report = state
        .services
        .completion
        .complete_registration(account_id, &email, invite_ref, invitation.mentor_id)
        .await;

    info!(
        account_id = %account_id,
        mentor_id = %invitation.mentor_id,
        warnings = report.warnings.len(),
        "Client registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterClientResponse {
            account_id,
            mentor_id: report.mentor_id,
            invitation_id: report.consumed_invitation,
            mentor_linked: report.mentor_linked,
            warnings: report.warning_messages(),
        }),
    ))
}
