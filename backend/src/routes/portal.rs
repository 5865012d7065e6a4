use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Portal Router Module
///
/// The role-gated areas. No per-handler role checks: every path here matches a rule of
/// `access::RULES`, so the gate middleware has already allowed or redirected the request and
/// left the resolved `AuthUser` in the request extensions.
pub fn portal_routes() -> Router<AppState> {
    Router::new()
        // Students, mentors and admins.
        .route("/dashboard", get(handlers::dashboard_home))
        // Mentors and admins.
        .route("/mentor", get(handlers::mentor_home))
        // Admins only.
        .route("/admin", get(handlers::admin_home))
        .route("/admin/logs", get(handlers::admin_logs_page))
}
