use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Authorization core.
pub mod access;
pub mod auth;
pub mod callback;
pub mod gate;

// Integrations and shared types.
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod repository;

// Module for routing segregation (Public, Portal, Admin API).
pub mod routes;
use routes::{admin, portal, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AuthError;
pub use identity::{IdentityState, MockIdentityStore, SupabaseIdentityClient};
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for the JSON endpoints, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::whoami, handlers::auth_callback, handlers::get_admin_logs
    ),
    components(
        schemas(
            models::Role, models::Profile, models::AuditLog, models::WhoAmIResponse,
            models::PortalHome, models::CallbackRequest, models::CallbackResponse,
            models::CallbackStatus, models::LoginRequest, models::LoginResponse,
        )
    ),
    tags(
        (name = "trident-portal", description = "Trident Portal auth API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cloneable container for every service a request may need.
#[derive(Clone)]
pub struct AppState {
    /// Profiles and audit log.
    pub repo: RepositoryState,
    /// Hosted identity provider (Supabase Auth).
    pub identity: IdentityState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing structure. The gate middleware wraps every route: it classifies the
/// path, lets public paths straight through and resolves the session only for gated ones.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(portal::portal_routes())
        .nest("/api/admin", admin::admin_routes())
        // Applied to the whole router, so unmatched protected paths are gated too.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::gate_middleware,
        ))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for every request: method, path and request id. Only the path is recorded, since
/// callback query strings carry single-use credentials.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        path = %request.uri().path(),
        req_id = %request_id,
    )
}
