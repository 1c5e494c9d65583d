//! Mentor and account models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::invitation::InvitationRole;

/// A mentor who owns invitations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Mentor {
    pub id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
}

/// Data sent to the hosted auth provider when a client signs up.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AccountSignup {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub full_name: String,
    pub role: InvitationRole,
    pub mentor_id: Uuid,
}
