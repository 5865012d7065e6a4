use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin API Router Module
///
/// `/api/admin/*` does not fall under the gated `/admin` prefix, so each handler checks
/// `role == Role::Admin` on the `AuthUser` it extracts and answers 403 otherwise.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /api/admin/logs
        // Latest audit entries (sign-ins and failed sign-ins).
        .route("/logs", get(handlers::get_admin_logs))
}
