//! Email delivery outcome models.

use serde::{Deserialize, Serialize};

/// Why an email provider refused or failed to deliver a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailureKind {
    /// The sender domain has not been verified with the provider.
    DomainNotVerified,
    /// The provider API key is missing or was rejected.
    ApiKeyMissing,
    /// SMTP, network or timeout failure while talking to the provider.
    TransportError,
    Unknown,
}

impl DeliveryFailureKind {
    /// User-facing hint describing how to recover from this failure.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            DeliveryFailureKind::DomainNotVerified => {
                "Verify a sending domain with the email provider, then resend the invitation."
            }
            DeliveryFailureKind::ApiKeyMissing => {
                "The email service is not configured. Contact support about the email API key."
            }
            DeliveryFailureKind::TransportError => {
                "Connection issue while sending the email. Try again in a moment."
            }
            DeliveryFailureKind::Unknown => {
                "The email could not be sent. The invitation is saved and can be resent."
            }
        }
    }
}

impl std::fmt::Display for DeliveryFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailureKind::DomainNotVerified => write!(f, "domain_not_verified"),
            DeliveryFailureKind::ApiKeyMissing => write!(f, "api_key_missing"),
            DeliveryFailureKind::TransportError => write!(f, "transport_error"),
            DeliveryFailureKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// One attempt to hand a message to a single provider. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EmailDeliveryAttempt {
    pub provider: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DeliveryFailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Outcome of dispatching an invitation email, including every attempt made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchResult {
    pub success: bool,
    /// Provider that delivered the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DeliveryFailureKind>,
    pub is_domain_error: bool,
    pub is_api_key_error: bool,
    pub is_transport_error: bool,
    pub attempts: Vec<EmailDeliveryAttempt>,
}

impl DispatchResult {
    pub fn delivered(service: impl Into<String>, attempts: Vec<EmailDeliveryAttempt>) -> Self {
        Self {
            success: true,
            service: Some(service.into()),
            error: None,
            failure: None,
            is_domain_error: false,
            is_api_key_error: false,
            is_transport_error: false,
            attempts,
        }
    }

    pub fn failed(
        kind: DeliveryFailureKind,
        error: impl Into<String>,
        attempts: Vec<EmailDeliveryAttempt>,
    ) -> Self {
        Self {
            success: false,
            service: None,
            error: Some(error.into()),
            failure: Some(kind),
            is_domain_error: kind == DeliveryFailureKind::DomainNotVerified,
            is_api_key_error: kind == DeliveryFailureKind::ApiKeyMissing,
            is_transport_error: kind == DeliveryFailureKind::TransportError,
            attempts,
        }
    }

    pub fn remediation_hint(&self) -> Option<&'static str> {
        self.failure.map(|kind| kind.remediation_hint())
    }
}
