//! Hosted auth provider client used to create client accounts.

use async_trait::async_trait;
use domain::models::AccountSignup;
use domain::services::{AccountError, AccountProvider};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::AuthConfig;

#[derive(Debug, Serialize)]
struct SignupBody<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a AccountSignup,
}

/// Client for the hosted auth REST API (`POST {url}/signup`).
#[derive(Clone)]
pub struct HostedAuthClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HostedAuthClient {
    pub fn new(config: &AuthConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn signup_url(&self) -> String {
        format!("{}/signup", self.base_url)
    }
}

/// Reads the new user's id from either `{"id": ..}` or `{"user": {"id": ..}}`.
fn parse_user_id(body: &serde_json::Value) -> Option<Uuid> {
    body.get("id")
        .or_else(|| body.pointer("/user/id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn classify_failure(status: StatusCode, body: &str) -> AccountError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string());

    let lowered = message.to_lowercase();
    if matches!(status, StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST)
        && (lowered.contains("already registered") || lowered.contains("already exists"))
    {
        AccountError::AlreadyRegistered
    } else if status.is_client_error() {
        AccountError::Rejected(message)
    } else {
        AccountError::Unavailable(format!("{}: {}", status, message))
    }
}

#[async_trait]
impl AccountProvider for HostedAuthClient {
    async fn create_account(&self, signup: &AccountSignup) -> Result<Uuid, AccountError> {
        let body = SignupBody {
            email: &signup.email,
            password: &signup.password,
            data: signup,
        };

        let response = self
            .client
            .post(self.signup_url())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Auth provider request failed");
                AccountError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AccountError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            let err = classify_failure(status, &text);
            warn!(status = %status, error = %err, "Auth provider rejected signup");
            return Err(err);
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| AccountError::Unavailable(format!("invalid signup response: {}", e)))?;
        let id = parse_user_id(&json).ok_or_else(|| {
            AccountError::Unavailable("signup response did not contain a user id".to_string())
        })?;

        debug!(account_id = %id, "Auth provider created account");
        Ok(id)
    }
}
