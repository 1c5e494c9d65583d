//! Common test utilities for integration tests.
//!
//! The router is built over in-memory stores, a manual clock, scripted
//! email providers and a mock auth provider, so no database or network is
//! needed.

// Allow dead code in this module - not every integration test uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use domain::models::{AccountSignup, Mentor};
use domain::services::{
    AccountError, AccountProvider, DeliveryMode, DispatcherSettings, EmailDispatcher,
    InMemoryInvitationStore, InMemoryProfileStore, ManualClock, MockEmailProvider,
};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use mentorlink_api::{
    app::{create_app, AppServices},
    config::{
        AuthConfig, Config, DatabaseConfig, EmailConfig, InvitationsConfig, LoggingConfig,
        SecurityConfig, ServerConfig,
    },
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Test configuration. Rate limiting is off unless a test turns it on.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Use random port
            request_timeout_secs: 30,
            max_body_size: 65_536,
        },
        database: DatabaseConfig {
            url: "postgres://unused@localhost/unused".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            cors_origins: vec![],
            rate_limit_per_minute: 0, // Disable rate limiting for tests
        },
        email: EmailConfig {
            primary_provider: "console".to_string(),
            sender_email: "test@example.com".to_string(),
            sender_name: "Test".to_string(),
            app_base_url: "https://app.example.com".to_string(),
            ..EmailConfig::default()
        },
        invitations: InvitationsConfig::default(),
        auth: AuthConfig {
            url: "https://auth.example.com/auth/v1".to_string(),
            api_key: "test-anon-key".to_string(),
            timeout_secs: 5,
        },
    }
}

/// Auth provider double that records signups.
#[derive(Default)]
pub struct MockAccountProvider {
    signups: Mutex<Vec<AccountSignup>>,
    failure: Mutex<Option<AccountError>>,
}

impl MockAccountProvider {
    pub fn fail_with(&self, error: AccountError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn signups(&self) -> Vec<AccountSignup> {
        self.signups.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountProvider for MockAccountProvider {
    async fn create_account(&self, signup: &AccountSignup) -> Result<Uuid, AccountError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.signups.lock().unwrap().push(signup.clone());
        Ok(Uuid::new_v4())
    }
}

/// Router plus handles on every collaborator behind it.
pub struct TestHarness {
    pub app: Router,
    pub clock: ManualClock,
    pub store: Arc<InMemoryInvitationStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub primary: Arc<MockEmailProvider>,
    pub secondary: Option<Arc<MockEmailProvider>>,
    pub accounts: Arc<MockAccountProvider>,
    pub mentor: Mentor,
}

/// Knobs for building a [`TestHarness`].
pub struct HarnessOptions {
    pub config: Config,
    pub primary: MockEmailProvider,
    pub secondary: Option<MockEmailProvider>,
    pub atomic_store: bool,
    /// Per-attempt provider timeout.
    pub dispatch_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config: test_config(),
            primary: MockEmailProvider::new("resend"),
            secondary: None,
            atomic_store: true,
            dispatch_timeout: Duration::from_millis(200),
        }
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let clock = ManualClock::starting_now();

        let mut store = InMemoryInvitationStore::new(Arc::new(clock.clone()));
        if !options.atomic_store {
            store = store.without_atomic_issue();
        }
        let store = Arc::new(store);

        let mentor = Mentor {
            id: Uuid::new_v4(),
            display_name: "Grace Mentor".to_string(),
            email: Some("grace@example.com".to_string()),
        };
        let profiles = Arc::new(InMemoryProfileStore::new().with_mentor(mentor.clone()));

        let primary = Arc::new(options.primary);
        let secondary = options.secondary.map(Arc::new);
        let settings = DispatcherSettings {
            mode: DeliveryMode::Live,
            app_base_url: options.config.email.app_base_url.clone(),
            registration_path: options.config.email.registration_path.clone(),
            timeout: options.dispatch_timeout,
            ..DispatcherSettings::default()
        };
        let mut dispatcher = EmailDispatcher::new(primary.clone(), settings);
        if let Some(secondary) = &secondary {
            dispatcher = dispatcher.with_secondary(secondary.clone());
        }

        let accounts = Arc::new(MockAccountProvider::default());
        let services = AppServices::new(
            &options.config,
            store.clone(),
            profiles.clone(),
            accounts.clone(),
            dispatcher,
            Arc::new(clock.clone()),
        );

        Self {
            app: create_app(options.config, services),
            clock,
            store,
            profiles,
            primary,
            secondary,
            accounts,
            mentor,
        }
    }

    pub fn invitations_uri(&self) -> String {
        format!("/api/v1/mentors/{}/invitations", self.mentor.id)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Generated invitee.
pub struct TestInvitee {
    pub email: String,
    pub name: String,
}

impl TestInvitee {
    pub fn new() -> Self {
        Self {
            email: SafeEmail().fake::<String>().to_lowercase(),
            name: Name().fake(),
        }
    }

    pub fn issue_body(&self) -> serde_json::Value {
        serde_json::json!({ "email": self.email, "name": self.name })
    }
}

impl Default for TestInvitee {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a JSON request.
pub fn json_request(
    method: axum::http::Method,
    uri: &str,
    body: serde_json::Value,
) -> axum::http::Request<axum::body::Body> {
    use axum::{body::Body, http::{header, Request}};

    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a GET request.
pub fn get_request(uri: &str) -> axum::http::Request<axum::body::Body> {
    use axum::{body::Body, http::{Method, Request}};

    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Build an empty POST request.
pub fn post_request(uri: &str) -> axum::http::Request<axum::body::Body> {
    use axum::{body::Body, http::{Method, Request}};

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse response body as JSON.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

/// Percent-encode a value for use in a query string.
pub fn query_value(value: &str) -> String {
    serde_urlencoded::to_string([("v", value)])
        .unwrap()
        .trim_start_matches("v=")
        .to_string()
}
