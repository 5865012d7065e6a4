use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that classify as public and are therefore never session-resolved by the gate.
/// Handlers that care about the caller (whoami, the callback) resolve credentials themselves.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for load balancers.
        .route("/health", get(|| async { "ok" }))
        // GET /login, GET /unauthorized
        // Redirect targets of the gate. Kept distinct so an under-privileged user is not asked
        // to sign in again.
        .route("/login", get(handlers::login_page))
        .route("/unauthorized", get(handlers::unauthorized_page))
        // POST /api/auth/login
        // Emails a one-time sign-in link pointing back at /auth/callback.
        .route("/api/auth/login", post(handlers::login))
        // GET /auth/callback?token_hash=..&type=.. | ?code=.. | #access_token=..
        // Landing URL of emailed sign-in links. Query credentials are exchanged here; anything
        // else gets a page that posts the full location to the JSON endpoint below.
        .route("/auth/callback", get(handlers::auth_callback_page))
        // POST /api/auth/callback
        // Same state machine, fed the full browser URL so fragment tokens can be exchanged.
        .route("/api/auth/callback", post(handlers::auth_callback))
        // GET /api/auth/whoami
        // Identity + role of the caller; provisions a student profile on first sight.
        .route("/api/auth/whoami", get(handlers::whoami))
}
