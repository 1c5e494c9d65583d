//! Invitation email dispatch.
//!
//! Sends through a primary [`EmailProvider`] and, when configured, a
//! secondary one. Provider errors are mapped to a [`DeliveryFailureKind`] by
//! a pluggable [`DeliveryErrorClassifier`]. Dispatch never returns an error:
//! every outcome is described by a [`DispatchResult`].

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::{
    DeliveryFailureKind, DispatchResult, EmailDeliveryAttempt, DEFAULT_INVITATION_TTL_DAYS,
};

/// Default time to wait for a provider before reporting a timeout.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Error returned by a provider, carrying its raw error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// HTTP status returned by the provider, if the request got that far.
    pub status: Option<u16>,
    pub message: String,
    /// The request never got a response (connect, DNS, TLS or timeout).
    pub transport: bool,
}

impl ProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            transport: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            transport: true,
            ..Self::new(None, message)
        }
    }
}

/// Sender identity overriding the provider default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub name: Option<String>,
}

/// A transactional email ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub from: Option<Sender>,
}

/// A single transactional email integration.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError>;
}

/// Maps a provider error to the delivery failure taxonomy.
pub trait DeliveryErrorClassifier: Send + Sync {
    fn classify(&self, error: &ProviderError) -> DeliveryFailureKind;
}

impl<F> DeliveryErrorClassifier for F
where
    F: Fn(&ProviderError) -> DeliveryFailureKind + Send + Sync,
{
    fn classify(&self, error: &ProviderError) -> DeliveryFailureKind {
        self(error)
    }
}

/// Substring rules over the lowercased provider message, checked in order.
/// Errors flagged as transport failures skip the rules; unmatched 401/403
/// responses count as a key problem.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(DeliveryFailureKind, Vec<String>)>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<(DeliveryFailureKind, Vec<String>)>) -> Self {
        Self { rules }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let rule = |kind, words: &[&str]| (kind, words.iter().map(|w| w.to_string()).collect());
        Self::new(vec![
            rule(
                DeliveryFailureKind::DomainNotVerified,
                &[
                    "verify a domain",
                    "domain is not verified",
                    "domain not verified",
                    "unverified domain",
                    "sender identity",
                ],
            ),
            rule(
                DeliveryFailureKind::ApiKeyMissing,
                &[
                    "api key",
                    "api_key",
                    "apikey",
                    "api-key",
                    "missing authorization",
                    "unauthorized",
                    "not configured",
                ],
            ),
            rule(
                DeliveryFailureKind::TransportError,
                &[
                    "smtp",
                    "connection",
                    "network",
                    "timed out",
                    "timeout",
                    "dns",
                    "tls",
                ],
            ),
        ])
    }
}

impl DeliveryErrorClassifier for KeywordClassifier {
    fn classify(&self, error: &ProviderError) -> DeliveryFailureKind {
        if error.transport {
            return DeliveryFailureKind::TransportError;
        }
        let message = error.message.to_lowercase();
        for (kind, words) in &self.rules {
            if words.iter().any(|w| message.contains(w.as_str())) {
                return *kind;
            }
        }
        match error.status {
            Some(401) | Some(403) => DeliveryFailureKind::ApiKeyMissing,
            _ => DeliveryFailureKind::Unknown,
        }
    }
}

/// Whether dispatch talks to real providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Live,
    /// Skip providers and report success, for development and test setups.
    Simulated,
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub mode: DeliveryMode,
    /// Frontend origin, e.g. `https://app.example.com`.
    pub app_base_url: String,
    /// Client registration page path, e.g. `/register/client`.
    pub registration_path: String,
    pub product_name: String,
    /// Per-attempt provider timeout.
    pub timeout: Duration,
    /// Budget for the whole dispatch, across primary and secondary.
    pub deadline: Option<Duration>,
    pub invitation_ttl_days: i64,
    pub sender: Option<Sender>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Live,
            app_base_url: "http://localhost:3000".to_string(),
            registration_path: "/register/client".to_string(),
            product_name: "MentorLink".to_string(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            deadline: None,
            invitation_ttl_days: DEFAULT_INVITATION_TTL_DAYS,
            sender: None,
        }
    }
}

/// Recipient data for an invitation email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteNotice {
    pub email: String,
    pub name: String,
    pub mentor_name: String,
    pub code: Option<String>,
}

pub struct EmailDispatcher {
    primary: Arc<dyn EmailProvider>,
    secondary: Option<Arc<dyn EmailProvider>>,
    classifier: Arc<dyn DeliveryErrorClassifier>,
    settings: DispatcherSettings,
}

impl EmailDispatcher {
    pub fn new(primary: Arc<dyn EmailProvider>, settings: DispatcherSettings) -> Self {
        Self {
            primary,
            secondary: None,
            classifier: Arc::new(KeywordClassifier::default()),
            settings,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn EmailProvider>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn DeliveryErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Caps the total time spent in `send_invite`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.settings.deadline = Some(deadline);
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Link to the client registration page, carrying the recipient email
    /// and, when known, the invitation code.
    pub fn registration_link(&self, email: &str, code: Option<&str>) -> String {
        let mut params = vec![("email", email)];
        if let Some(code) = code {
            params.push(("code", code));
        }
        let query = serde_urlencoded::to_string(&params).unwrap_or_default();
        format!(
            "{}{}?{}",
            self.settings.app_base_url.trim_end_matches('/'),
            self.settings.registration_path,
            query
        )
    }

    /// Sends the invitation email. Each call makes a fresh delivery attempt.
    pub async fn send_invite(&self, notice: &InviteNotice) -> DispatchResult {
        if self.settings.mode == DeliveryMode::Simulated {
            info!(
                to = %notice.email,
                mentor = %notice.mentor_name,
                "Simulated delivery mode, invitation email not sent"
            );
            let attempt = EmailDeliveryAttempt {
                provider: "simulated".to_string(),
                success: true,
                failure: None,
                error: None,
                elapsed_ms: 0,
            };
            return DispatchResult::delivered("simulated", vec![attempt]);
        }

        let email = self.compose(notice);
        let mut attempts = Vec::with_capacity(2);
        let deadline = self.settings.deadline.map(|d| Instant::now() + d);

        let primary = self
            .attempt(self.primary.as_ref(), &email, self.attempt_timeout(deadline))
            .await;
        let primary_ok = primary.success;
        attempts.push(primary);
        if primary_ok {
            return DispatchResult::delivered(self.primary.name(), attempts);
        }

        let remaining = self.attempt_timeout(deadline);
        let secondary = self.secondary.as_ref().filter(|secondary| {
            if remaining.is_zero() {
                warn!(
                    secondary = %secondary.name(),
                    "Dispatch deadline reached, secondary email provider not tried"
                );
            }
            !remaining.is_zero()
        });
        if let Some(secondary) = secondary {
            warn!(
                primary = %self.primary.name(),
                secondary = %secondary.name(),
                "Primary email provider failed, trying secondary"
            );
            let fallback = self.attempt(secondary.as_ref(), &email, remaining).await;
            let fallback_ok = fallback.success;
            attempts.push(fallback);
            if fallback_ok {
                return DispatchResult::delivered(secondary.name(), attempts);
            }
        }

        // Report the last provider's failure; earlier attempts stay listed.
        let (kind, message) = attempts
            .last()
            .map(|a| {
                (
                    a.failure.unwrap_or(DeliveryFailureKind::Unknown),
                    format!(
                        "{}: {}",
                        a.provider,
                        a.error.clone().unwrap_or_else(|| "unknown error".to_string())
                    ),
                )
            })
            .unwrap_or((DeliveryFailureKind::Unknown, "no provider attempted".to_string()));

        error!(
            to = %notice.email,
            failure = %kind,
            error = %message,
            "Invitation email could not be delivered"
        );

        DispatchResult::failed(kind, message, attempts)
    }

    /// Per-attempt timeout, shortened to what is left of the deadline.
    fn attempt_timeout(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => self
                .settings
                .timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.settings.timeout,
        }
    }

    async fn attempt(
        &self,
        provider: &dyn EmailProvider,
        email: &OutboundEmail,
        timeout: Duration,
    ) -> EmailDeliveryAttempt {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, provider.send(email)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(Ok(())) => {
                info!(
                    provider = %provider.name(),
                    to = %email.to,
                    elapsed_ms,
                    "Invitation email sent"
                );
                return EmailDeliveryAttempt {
                    provider: provider.name().to_string(),
                    success: true,
                    failure: None,
                    error: None,
                    elapsed_ms,
                };
            }
            Ok(Err(err)) => err,
            Err(_) => ProviderError::transport(format!(
                "timed out after {}ms waiting for the provider",
                timeout.as_millis()
            )),
        };

        let kind = self.classifier.classify(&error);
        warn!(
            provider = %provider.name(),
            status = ?error.status,
            failure = %kind,
            error = %error.message,
            "Email provider attempt failed"
        );

        EmailDeliveryAttempt {
            provider: provider.name().to_string(),
            success: false,
            failure: Some(kind),
            error: Some(error.message),
            elapsed_ms,
        }
    }

    fn compose(&self, notice: &InviteNotice) -> OutboundEmail {
        let link = self.registration_link(&notice.email, notice.code.as_deref());
        let product = &self.settings.product_name;
        let days = self.settings.invitation_ttl_days;

        let subject = format!("{} invited you to {}", notice.mentor_name, product);

        let code_line = notice
            .code
            .as_deref()
            .map(|c| format!("\nYour invitation code: {}\n", c))
            .unwrap_or_default();

        let text = format!(
            r#"Hi {name},

{mentor} has invited you to join {product} as their client.

Create your account using the link below:

{link}
{code_line}
This invitation expires in {days} days.

If you weren't expecting this invitation, you can safely ignore this email.

Best regards,
The {product} Team"#,
            name = notice.name,
            mentor = notice.mentor_name,
        );

        let name_html = escape_html(&notice.name);
        let mentor_html = escape_html(&notice.mentor_name);
        let code_html = notice
            .code
            .as_deref()
            .map(|c| {
                format!(
                    r#"<p style="color: #666; font-size: 14px;">Your invitation code: <strong>{}</strong></p>"#,
                    c
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>You're invited</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Helvetica, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background: #2f6f5e; padding: 30px; border-radius: 10px 10px 0 0;">
        <h1 style="color: white; margin: 0; font-size: 24px;">{product}</h1>
    </div>
    <div style="background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px;">
        <h2 style="color: #333; margin-top: 0;">You're invited</h2>
        <p>Hi {name},</p>
        <p>{mentor} has invited you to join {product} as their client.</p>
        <div style="text-align: center; margin: 30px 0;">
            <a href="{link}" style="background: #2f6f5e; color: white; padding: 14px 28px; text-decoration: none; border-radius: 6px; font-weight: bold; display: inline-block;">Create your account</a>
        </div>
        {code_html}
        <p style="color: #666; font-size: 14px;">This invitation expires in {days} days.</p>
        <hr style="border: none; border-top: 1px solid #ddd; margin: 30px 0;">
        <p style="color: #999; font-size: 12px;">Or copy and paste this link into your browser:<br><a href="{link}" style="color: #2f6f5e;">{link}</a></p>
    </div>
</body>
</html>"#,
            name = name_html,
            mentor = mentor_html,
            link = escape_html(&link),
        );

        OutboundEmail {
            to: notice.email.clone(),
            to_name: Some(notice.name.clone()),
            subject,
            html,
            text: Some(text),
            from: self.settings.sender.clone(),
        }
    }
}

/// Escapes text for insertion into HTML element content or a quoted attribute.
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Mock provider for development and testing.
///
/// Records every message it accepts. Failure can be switched on and off
/// to simulate a provider outage that is later fixed.
#[derive(Debug, Default)]
pub struct MockEmailProvider {
    name: String,
    failure: Mutex<Option<ProviderError>>,
    delay: Option<Duration>,
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MockEmailProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A provider that rejects every message with the given error.
    pub fn failing(name: impl Into<String>, status: Option<u16>, message: &str) -> Self {
        let provider = Self::new(name);
        provider.set_failure(Some(ProviderError::new(status, message)));
        provider
    }

    /// Wait before answering, to exercise dispatch timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failure(&self, failure: Option<ProviderError>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(err) = failure {
            warn!(provider = %self.name, to = %email.to, "Mock email provider simulating failure");
            return Err(err);
        }

        info!(provider = %self.name, to = %email.to, subject = %email.subject, "Mock: Would send email");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.clone());
        Ok(())
    }
}
