use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{
    AccountProvider, Clock, EmailDispatcher, InvitationIssuer, InvitationStore,
    InvitationVerifier, IssuerSettings, ProfileStore, RegistrationCompletion, SystemClock,
};
use persistence::repositories::{InvitationRepository, ProfileRepository};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, trace_id, RateLimiterState,
};
use crate::routes::{health, invitations, registration};
use crate::services::{build_dispatcher, EmailSetupError, HostedAuthClient};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("Email setup failed: {0}")]
    Email(#[from] EmailSetupError),

    #[error("Auth client setup failed: {0}")]
    Auth(#[from] reqwest::Error),
}

/// Share of the request timeout that email dispatch may use; the rest is
/// left for the store calls around it.
const DISPATCH_BUDGET_NUMERATOR: u32 = 3;
const DISPATCH_BUDGET_DENOMINATOR: u32 = 4;

/// Dispatch deadline that keeps a saved invitation from being hidden behind
/// the request timeout layer.
pub fn dispatch_budget(request_timeout: Duration) -> Duration {
    request_timeout * DISPATCH_BUDGET_NUMERATOR / DISPATCH_BUDGET_DENOMINATOR
}

/// Invitation lifecycle services shared by the handlers.
#[derive(Clone)]
pub struct AppServices {
    pub invitations: Arc<dyn InvitationStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub accounts: Arc<dyn AccountProvider>,
    pub issuer: Arc<InvitationIssuer>,
    pub verifier: Arc<InvitationVerifier>,
    pub completion: Arc<RegistrationCompletion>,
}

impl AppServices {
    /// Wires the services over the given stores and collaborators.
    pub fn new(
        config: &Config,
        invitations: Arc<dyn InvitationStore>,
        profiles: Arc<dyn ProfileStore>,
        accounts: Arc<dyn AccountProvider>,
        dispatcher: EmailDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = IssuerSettings {
            atomic_issuance: config.invitations.atomic_issuance,
            max_code_retries: config.invitations.max_code_retries,
        };
        let request_timeout = Duration::from_secs(config.server.request_timeout_secs);
        let dispatcher = dispatcher.with_deadline(dispatch_budget(request_timeout));
        let issuer = InvitationIssuer::new(
            invitations.clone(),
            Arc::new(dispatcher),
            clock,
            settings,
        );

        Self {
            issuer: Arc::new(issuer),
            verifier: Arc::new(InvitationVerifier::new(invitations.clone())),
            completion: Arc::new(RegistrationCompletion::new(
                invitations.clone(),
                profiles.clone(),
            )),
            invitations,
            profiles,
            accounts,
        }
    }

    /// Production wiring: Postgres stores, configured email providers and
    /// the hosted auth client.
    pub fn postgres(pool: PgPool, config: &Config) -> Result<Self, ServicesError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ttl = chrono::Duration::days(config.invitations.ttl_days);

        let invitations = Arc::new(InvitationRepository::new(pool.clone(), clock.clone(), ttl));
        let profiles = Arc::new(ProfileRepository::new(pool));
        let accounts = Arc::new(HostedAuthClient::new(&config.auth)?);
        let dispatcher = build_dispatcher(&config.email, config.invitations.ttl_days)?;

        Ok(Self::new(
            config,
            invitations,
            profiles,
            accounts,
            dispatcher,
            clock,
        ))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: AppServices,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
}

pub fn create_app(config: Config, services: AppServices) -> Router {
    let config = Arc::new(config);

    // Rate limiting is disabled when rate_limit_per_minute is 0
    let rate_limiter = RateLimiterState::new(config.security.rate_limit_per_minute).map(Arc::new);

    let state = AppState {
        config: config.clone(),
        services,
        rate_limiter,
    };

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // Production: only allow specified origins
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Mentor invitation management
    let mentor_routes = Router::new()
        .route(
            "/api/v1/mentors/:mentor_id/invitations",
            post(invitations::issue_invitation).get(invitations::list_invitations),
        )
        .route(
            "/api/v1/mentors/:mentor_id/invitations/:invitation_id/resend",
            post(invitations::resend_invitation),
        );

    // Client-facing routes reachable from an emailed link, rate limited per client
    let client_routes = Router::new()
        .route("/api/v1/invitations/verify", get(invitations::verify_invitation))
        .route("/api/v1/registrations", post(registration::register_client))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    // Public routes (no rate limiting)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    // Merge all routes
    Router::new()
        .merge(public_routes)
        .merge(mentor_routes)
        .merge(client_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware)) // Prometheus metrics
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id)) // Request ID and logging
        .layer(cors)
        .with_state(state)
}
