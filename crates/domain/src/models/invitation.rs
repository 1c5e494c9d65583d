//! Client invitation domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Days an invitation stays valid after it is issued or renewed.
pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 7;

/// Role granted to the account that consumes an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationRole {
    #[default]
    Client,
}

impl InvitationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationRole::Client => "client",
        }
    }
}

impl std::fmt::Display for InvitationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvitationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(InvitationRole::Client),
            other => Err(format!("Unknown invitation role: {}", other)),
        }
    }
}

/// A persisted invitation sent by a mentor to a prospective client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationRecord {
    pub id: Uuid,
    pub code: String,
    pub email: String,
    pub mentor_id: Uuid,
    pub role: InvitationRole,
    pub invitee_name: Option<String>,
    pub is_used: bool,
    pub used_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl InvitationRecord {
    /// An invitation is valid while it is unused and not yet expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && self.expires_at > now
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.is_used {
            InvitationStatus::Used
        } else if self.expires_at > now {
            InvitationStatus::Pending
        } else {
            InvitationStatus::Expired
        }
    }
}

/// Display status derived from an invitation's usage and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Expired,
    Used,
}

/// Input for inserting a new invitation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitation {
    pub id: Uuid,
    pub code: String,
    pub email: String,
    pub mentor_id: Uuid,
    pub invitee_name: Option<String>,
}

impl NewInvitation {
    /// Prepares a new invitation with a fresh id and code.
    pub fn new(email: impl Into<String>, mentor_id: Uuid, invitee_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: generate_invite_code(),
            email: email.into(),
            mentor_id,
            invitee_name,
        }
    }

    /// Replaces the code after a collision with an existing invitation.
    pub fn regenerate_code(&mut self) {
        self.code = generate_invite_code();
    }
}

/// Reference to the invitation a registering client arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteRef {
    Id(Uuid),
    Code(String),
}

/// Request to invite a client. Checked by the issuer, which trims first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IssueInvitationRequest {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub name: String,
}

/// Invitation row as shown in a mentor's invitation history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationSummary {
    pub id: Uuid,
    pub code: String,
    pub email: String,
    pub invitee_name: Option<String>,
    pub status: InvitationStatus,
    pub used_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl InvitationSummary {
    pub fn from_record(record: InvitationRecord, now: DateTime<Utc>) -> Self {
        Self {
            status: record.status_at(now),
            id: record.id,
            code: record.code,
            email: record.email,
            invitee_name: record.invitee_name,
            used_by: record.used_by,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// Response for listing a mentor's invitations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListInvitationsResponse {
    pub data: Vec<InvitationSummary>,
}

/// Query parameters accepted on the registration page and verify endpoint.
///
/// Not format-checked: a malformed code simply fails to match and the
/// verifier falls back to the email.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerifyInvitationQuery {
    pub code: Option<String>,
    pub email: Option<String>,
}

lazy_static::lazy_static! {
    static ref INVITE_CODE_REGEX: regex::Regex =
        regex::Regex::new(r"^\s*(?i)[A-Z0-9]{3}-[A-Z0-9]{3}-[A-Z0-9]{3}\s*$").unwrap();
}

/// Request to register a client account through an invitation.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct RegisterClientRequest {
    #[validate(email(message = "Email address is not valid"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub full_name: String,

    #[validate(regex(
        path = *INVITE_CODE_REGEX,
        message = "Invalid invitation code format. Expected XXX-XXX-XXX"
    ))]
    pub code: Option<String>,
}

/// Response after a client registered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RegisterClientResponse {
    pub account_id: Uuid,
    pub mentor_id: Uuid,
    pub invitation_id: Option<Uuid>,
    pub mentor_linked: bool,
    pub warnings: Vec<String>,
}

/// Generate a random invitation code in XXX-XXX-XXX format.
pub fn generate_invite_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let chars: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789"; // No 0/O or 1/I

    let mut segment = || -> String {
        (0..3)
            .map(|_| chars[rng.gen_range(0..chars.len())] as char)
            .collect()
    };

    format!("{}-{}-{}", segment(), segment(), segment())
}

/// Canonical form of a code typed or pasted by a user.
pub fn normalize_invite_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
