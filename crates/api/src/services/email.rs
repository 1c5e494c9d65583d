//! Email provider integrations for invitation delivery.
//!
//! Supported providers:
//! - `resend`: Resend HTTP API (default primary)
//! - `sendgrid`: SendGrid v3 mail send API
//! - `brevo`: Brevo transactional email API
//! - `console`: Logs emails instead of sending them (development)

use async_trait::async_trait;
use domain::services::{
    DispatcherSettings, EmailDispatcher, EmailProvider, OutboundEmail, ProviderError, Sender,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EmailConfig;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const BREVO_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Debug, Error)]
pub enum EmailSetupError {
    #[error("Unknown email provider: {0}")]
    UnknownProvider(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

fn missing_key(provider: &str) -> ProviderError {
    ProviderError::new(None, format!("{} API key is not configured", provider))
}

/// Converts a non-2xx response into a provider error, preferring the
/// provider's own `message` field over the raw body.
async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ProviderError::new(
        Some(status.as_u16()),
        format!("{} returned {}: {}", provider, status, extract_message(&body)),
    )
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| {
                    // SendGrid: {"errors": [{"message": "..."}]}
                    v.pointer("/errors/0/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
        })
        .unwrap_or_else(|| body.to_string())
}

/// reqwest's display text omits the cause ("error sending request for url"),
/// so the source chain is appended and network failures are flagged.
fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    let mut message = format!("{} request failed: {}", provider, err);
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }

    if err.is_connect() || err.is_timeout() || err.is_request() {
        ProviderError::transport(message)
    } else {
        ProviderError::new(err.status().map(|s| s.as_u16()), message)
    }
}

#[derive(Debug, Serialize)]
struct ResendBody<'a> {
    from: String,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Resend HTTP API provider.
pub struct ResendProvider {
    client: reqwest::Client,
    api_key: String,
    sender: Sender,
}

impl ResendProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, sender: Sender) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            sender,
        }
    }

    fn body<'a>(&self, email: &'a OutboundEmail) -> ResendBody<'a> {
        let sender = email.from.as_ref().unwrap_or(&self.sender);
        let from = match &sender.name {
            Some(name) => format!("{} <{}>", name, sender.email),
            None => sender.email.clone(),
        };
        ResendBody {
            from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: email.text.as_deref(),
        }
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    fn name(&self) -> &str {
        "resend"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(missing_key("Resend"));
        }

        let response = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&self.body(email))
            .send()
            .await
            .map_err(|e| transport_error("Resend", e))?;

        if response.status().is_success() {
            debug!(to = %email.to, "Resend accepted message");
            Ok(())
        } else {
            Err(error_from_response("Resend", response).await)
        }
    }
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendGridPersonalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridBody<'a> {
    personalizations: [SendGridPersonalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: Vec<SendGridContent<'a>>,
}

/// SendGrid v3 API provider.
pub struct SendGridProvider {
    client: reqwest::Client,
    api_key: String,
    sender: Sender,
}

impl SendGridProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, sender: Sender) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            sender,
        }
    }

    fn body<'a>(&'a self, email: &'a OutboundEmail) -> SendGridBody<'a> {
        let sender = email.from.as_ref().unwrap_or(&self.sender);
        // SendGrid requires text/plain before text/html.
        let mut content = Vec::with_capacity(2);
        if let Some(text) = &email.text {
            content.push(SendGridContent {
                kind: "text/plain",
                value: text,
            });
        }
        content.push(SendGridContent {
            kind: "text/html",
            value: &email.html,
        });

        SendGridBody {
            personalizations: [SendGridPersonalization {
                to: [Address {
                    email: &email.to,
                    name: email.to_name.as_deref(),
                }],
            }],
            from: Address {
                email: &sender.email,
                name: sender.name.as_deref(),
            },
            subject: &email.subject,
            content,
        }
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    fn name(&self) -> &str {
        "sendgrid"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(missing_key("SendGrid"));
        }

        let response = self
            .client
            .post(SENDGRID_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&self.body(email))
            .send()
            .await
            .map_err(|e| transport_error("SendGrid", e))?;

        if response.status().is_success() {
            debug!(to = %email.to, "SendGrid accepted message");
            Ok(())
        } else {
            Err(error_from_response("SendGrid", response).await)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoBody<'a> {
    sender: Address<'a>,
    to: [Address<'a>; 1],
    subject: &'a str,
    html_content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<&'a str>,
}

/// Brevo transactional email provider.
pub struct BrevoProvider {
    client: reqwest::Client,
    api_key: String,
    sender: Sender,
}

impl BrevoProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, sender: Sender) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            sender,
        }
    }

    fn body<'a>(&'a self, email: &'a OutboundEmail) -> BrevoBody<'a> {
        let sender = email.from.as_ref().unwrap_or(&self.sender);
        BrevoBody {
            sender: Address {
                email: &sender.email,
                name: sender.name.as_deref(),
            },
            to: [Address {
                email: &email.to,
                name: email.to_name.as_deref(),
            }],
            subject: &email.subject,
            html_content: &email.html,
            text_content: email.text.as_deref(),
        }
    }
}

#[async_trait]
impl EmailProvider for BrevoProvider {
    fn name(&self) -> &str {
        "brevo"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(missing_key("Brevo"));
        }

        let response = self
            .client
            .post(BREVO_ENDPOINT)
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&self.body(email))
            .send()
            .await
            .map_err(|e| transport_error("Brevo", e))?;

        if response.status().is_success() {
            debug!(to = %email.to, "Brevo accepted message");
            Ok(())
        } else {
            Err(error_from_response("Brevo", response).await)
        }
    }
}

/// Logs emails instead of sending them.
#[derive(Debug, Default)]
pub struct ConsoleProvider;

#[async_trait]
impl EmailProvider for ConsoleProvider {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.text.as_deref().unwrap_or(&email.html),
            "📧 Email (console provider)"
        );
        Ok(())
    }
}

/// Builds the named provider from configuration.
pub fn build_provider(
    name: &str,
    config: &EmailConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn EmailProvider>, EmailSetupError> {
    let sender = Sender {
        email: config.sender_email.clone(),
        name: Some(config.sender_name.clone()).filter(|n| !n.is_empty()),
    };

    let provider: Arc<dyn EmailProvider> = match name {
        "resend" => Arc::new(ResendProvider::new(
            client.clone(),
            config.resend_api_key.clone(),
            sender,
        )),
        "sendgrid" => Arc::new(SendGridProvider::new(
            client.clone(),
            config.sendgrid_api_key.clone(),
            sender,
        )),
        "brevo" => Arc::new(BrevoProvider::new(
            client.clone(),
            config.brevo_api_key.clone(),
            sender,
        )),
        "console" => Arc::new(ConsoleProvider),
        other => return Err(EmailSetupError::UnknownProvider(other.to_string())),
    };
    Ok(provider)
}

/// Builds the invitation email dispatcher from configuration.
pub fn build_dispatcher(
    config: &EmailConfig,
    invitation_ttl_days: i64,
) -> Result<EmailDispatcher, EmailSetupError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    // The dispatcher enforces the per-attempt deadline; the client timeout
    // only bounds connections the dispatcher has already given up on.
    let client = reqwest::Client::builder()
        .timeout(timeout + Duration::from_secs(5))
        .build()?;

    let settings = DispatcherSettings {
        mode: config.delivery_mode,
        app_base_url: config.app_base_url.clone(),
        registration_path: config.registration_path.clone(),
        product_name: config.product_name.clone(),
        timeout,
        deadline: None,
        invitation_ttl_days,
        sender: None,
    };

    let primary = build_provider(&config.primary_provider, config, &client)?;
    let mut dispatcher = EmailDispatcher::new(primary, settings);
    if let Some(secondary) = config
        .secondary_provider
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        dispatcher = dispatcher.with_secondary(build_provider(secondary, config, &client)?);
    }

    info!(
        primary = %config.primary_provider,
        secondary = ?config.secondary_provider,
        mode = ?config.delivery_mode,
        "Email dispatcher configured"
    );
    Ok(dispatcher)
}
