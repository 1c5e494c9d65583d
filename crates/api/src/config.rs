use domain::services::DeliveryMode;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    /// Invitation email delivery
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub invitations: InvitationsConfig,
    /// Hosted auth provider used for client signup
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::PoolSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Requests per minute per client address on public endpoints (0 disables)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

/// Invitation email delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// `live` sends through providers; `simulated` only logs.
    #[serde(default)]
    pub delivery_mode: DeliveryMode,

    /// Primary provider: resend, sendgrid, brevo or console
    #[serde(default = "default_primary_provider")]
    pub primary_provider: String,

    /// Optional provider tried after the primary fails
    #[serde(default)]
    pub secondary_provider: Option<String>,

    #[serde(default)]
    pub resend_api_key: String,

    #[serde(default)]
    pub sendgrid_api_key: String,

    #[serde(default)]
    pub brevo_api_key: String,

    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Frontend origin used in registration links (e.g., https://app.example.com)
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    #[serde(default = "default_registration_path")]
    pub registration_path: String,

    /// Seconds to wait for a provider before reporting a timeout
    #[serde(default = "default_email_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_product_name")]
    pub product_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::default(),
            primary_provider: default_primary_provider(),
            secondary_provider: None,
            resend_api_key: String::new(),
            sendgrid_api_key: String::new(),
            brevo_api_key: String::new(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            app_base_url: default_app_base_url(),
            registration_path: default_registration_path(),
            timeout_secs: default_email_timeout(),
            product_name: default_product_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationsConfig {
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,

    /// Use the database's insert-or-renew function when available
    #[serde(default = "default_atomic_issuance")]
    pub atomic_issuance: bool,

    /// Extra attempts after an invitation code collision
    #[serde(default = "default_max_code_retries")]
    pub max_code_retries: u32,
}

impl Default for InvitationsConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            atomic_issuance: default_atomic_issuance(),
            max_code_retries: default_max_code_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the hosted auth REST API (e.g., https://project.example.co/auth/v1)
    #[serde(default)]
    pub url: String,

    /// Public API key sent in the `apikey` header
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    65_536
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rate_limit() -> u32 {
    60
}
fn default_primary_provider() -> String {
    "resend".to_string()
}
fn default_sender_email() -> String {
    "invitations@mentorlink.app".to_string()
}
fn default_sender_name() -> String {
    "MentorLink".to_string()
}
fn default_app_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_registration_path() -> String {
    "/register/client".to_string()
}
fn default_email_timeout() -> u64 {
    15
}
fn default_product_name() -> String {
    "MentorLink".to_string()
}
fn default_ttl_days() -> i64 {
    domain::models::DEFAULT_INVITATION_TTL_DAYS
}
fn default_atomic_issuance() -> bool {
    true
}
fn default_max_code_retries() -> u32 {
    3
}
fn default_auth_timeout() -> u64 {
    10
}

/// Providers the email service can be built with.
pub const EMAIL_PROVIDERS: &[&str] = &["resend", "sendgrid", "brevo", "console"];

/// Upper bound on invitation lifetime.
pub const MAX_INVITATION_TTL_DAYS: i64 = 365;

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with ML__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("ML").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Defaults are embedded so tests do not depend on config files.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            max_body_size = 65536

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []
            rate_limit_per_minute = 60

            [email]
            delivery_mode = "simulated"
            primary_provider = "console"
            sender_email = "test@example.com"
            sender_name = "Test"

            [invitations]
            ttl_days = 7
            atomic_issuance = true
            max_code_retries = 3

            [auth]
            url = "https://auth.example.com/auth/v1"
            api_key = "test-anon-key"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "ML__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.auth.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "ML__AUTH__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if !(1..=MAX_INVITATION_TTL_DAYS).contains(&self.invitations.ttl_days) {
            return Err(ConfigValidationError::InvalidValue(format!(
                "invitations.ttl_days must be between 1 and {}",
                MAX_INVITATION_TTL_DAYS
            )));
        }

        // Dispatch gets three quarters of the request timeout; a single
        // provider attempt must fit inside that share.
        let dispatch_share = self.server.request_timeout_secs.saturating_mul(3);
        if self.email.timeout_secs.saturating_mul(4) > dispatch_share {
            return Err(ConfigValidationError::InvalidValue(format!(
                "email.timeout_secs ({}) must be at most three quarters of server.request_timeout_secs ({})",
                self.email.timeout_secs, self.server.request_timeout_secs
            )));
        }

        let providers = std::iter::once(&self.email.primary_provider)
            .chain(self.email.secondary_provider.as_ref());
        for provider in providers {
            if !EMAIL_PROVIDERS.contains(&provider.as_str()) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "Unknown email provider '{}', expected one of: {}",
                    provider,
                    EMAIL_PROVIDERS.join(", ")
                )));
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
