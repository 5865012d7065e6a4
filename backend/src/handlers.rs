use crate::{
    AppState,
    access,
    auth::{
        AuthUser, CODE_VERIFIER_COOKIE, Credentials, SessionResolver, bounded, extract_cookie,
        session_cookies,
    },
    callback::{AuthCallback, CallbackCredential, CallbackOutcome, ResolverRoleLookup},
    config::AppConfig,
    models::{
        AuditLog, CallbackRequest, CallbackResponse, CallbackStatus, LoginRequest, LoginResponse,
        PortalHome, Role, WhoAmIResponse,
    },
};
use axum::{
    Json,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
};
use std::sync::Arc;

/// Audit entries shown on the admin logs views.
const AUDIT_PAGE_SIZE: i64 = 50;

// --- Identity ---

/// whoami
///
/// [Public Route] Reports who the caller is. For a first-time identity this also creates the
/// student profile, which makes it the authoritative role read the callback relies on.
#[utoipa::path(
    get,
    path = "/api/auth/whoami",
    responses((status = 200, description = "Caller identity and role", body = WhoAmIResponse))
)]
pub async fn whoami(
    State(resolver): State<SessionResolver>,
    State(config): State<AppConfig>,
    headers: HeaderMap,
) -> Response {
    let credentials = Credentials::from_headers(&headers, &config.env);
    let resolution = resolver.resolve(&credentials).await;

    let body = match AuthUser::from_resolution(resolution) {
        None => WhoAmIResponse::default(),
        Some(user) => WhoAmIResponse {
            authenticated: true,
            user_id: Some(user.id),
            email: user.email,
            role: Some(user.role),
            full_name: user.full_name,
            sections: access::accessible_sections(user.role),
        },
    };

    // Role changes must be visible on the very next call.
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(body),
    )
        .into_response()
}

/// Origin the browser used to reach us, as seen through the `Host` header.
fn request_origin(headers: &HeaderMap, config: &AppConfig) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let scheme = if config.secure_cookies() { "https" } else { "http" };
    format!("{}://{}", scheme, host)
}

// --- Sign-in ---

/// login
///
/// [Public Route] Starts an email sign-in: the identity provider mails a one-time link that
/// lands on this portal's `/auth/callback`. The address is never logged.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Sign-in link sent", body = LoginResponse),
        (status = 400, description = "Not an email address", body = LoginResponse),
        (status = 502, description = "Identity provider refused or timed out", body = LoginResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    let Some(email) = payload.address() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(LoginResponse {
                sent: false,
                message: Some("Enter a valid email address.".to_string()),
            }),
        );
    };

    let redirect_to = format!("{}/auth/callback", request_origin(&headers, &state.config));
    let sent = bounded(
        state.config.lookup_timeout,
        state.identity.send_magic_link(email, &redirect_to),
    )
    .await;

    match sent {
        Ok(()) => (
            StatusCode::OK,
            Json(LoginResponse {
                sent: true,
                message: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "could not send sign-in link");
            (
                StatusCode::BAD_GATEWAY,
                Json(LoginResponse {
                    sent: false,
                    message: Some("Could not send the sign-in link. Try again shortly.".to_string()),
                }),
            )
        }
    }
}

// --- Auth callback ---

/// Runs one callback attempt for a single page load and records its audit row.
async fn run_callback(state: &AppState, url: &str, headers: &HeaderMap) -> CallbackOutcome {
    let roles = Arc::new(ResolverRoleLookup::new(SessionResolver::from_ref(state)));
    let machine = AuthCallback::new(state.identity.clone(), roles, state.config.lookup_timeout);
    let code_verifier = extract_cookie(headers, CODE_VERIFIER_COOKIE);

    let outcome = machine.run(url, code_verifier.as_deref()).await;

    // The audit trail is best-effort; a failed write never changes the sign-in result.
    if let Err(e) = state.repo.record_audit(outcome.audit_entry()).await {
        tracing::warn!(error = %e, "could not record sign-in audit entry");
    }
    outcome
}

fn failure_status(step: &str) -> StatusCode {
    match step {
        "credential" => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNAUTHORIZED,
    }
}

fn cookie_headers(state: &AppState, outcome: &CallbackOutcome) -> Vec<(header::HeaderName, String)> {
    match outcome {
        CallbackOutcome::Redirected { session, .. } => {
            session_cookies(session, state.config.secure_cookies())
                .into_iter()
                .map(|cookie| (header::SET_COOKIE, cookie))
                .collect()
        }
        CallbackOutcome::Failed { .. } => Vec::new(),
    }
}

/// Served when a GET callback has nothing in its query. Browsers keep the `#access_token`
/// fragment to themselves, so this page hands the full location to the JSON endpoint.
const CALLBACK_BRIDGE_PAGE: &str = r#"<main>
<h1>Signing you in</h1>
<p id="callback-status">Completing sign-in...</p>
<p><a href="/login">Back to sign in</a></p>
</main>
<script>
(async () => {
  const status = document.getElementById("callback-status");
  try {
    const response = await fetch("/api/auth/callback", {
      method: "POST",
      credentials: "same-origin",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ url: window.location.href }),
    });
    const body = await response.json();
    if (body.status === "ok" && body.redirect) {
      window.location.replace(body.redirect);
      return;
    }
    status.textContent = body.message || "Could not complete sign-in.";
  } catch (e) {
    status.textContent = "Could not complete sign-in.";
  }
})();
</script>"#;

/// auth_callback_page
///
/// [Public Route] Server-side completion of emailed links carrying `token_hash` + `type` or an
/// OAuth `code` in the query. Success stores the session cookies and redirects to the role
/// home; failure stays on this page with a diagnostic. Without query credentials the link
/// may still carry a fragment, so the browser finishes it through `/api/auth/callback`.
pub async fn auth_callback_page(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if !CallbackCredential::in_query(uri.query()) {
        return (
            [(header::CACHE_CONTROL, "no-store")],
            Html(CALLBACK_BRIDGE_PAGE),
        )
            .into_response();
    }

    let url = format!("{}{}", request_origin(&headers, &state.config), uri);

    let outcome = run_callback(&state, &url, &headers).await;
    let cookies = cookie_headers(&state, &outcome);

    match outcome {
        CallbackOutcome::Redirected { destination, .. } => {
            (AppendHeaders(cookies), Redirect::to(destination)).into_response()
        }
        CallbackOutcome::Failed { step, message } => (
            failure_status(step),
            Html(format!(
                "<main><h1>Sign-in failed</h1><p>Could not complete sign-in.</p>\
                 <p><small>{}</small></p><p><a href=\"/login\">Back to sign in</a></p></main>",
                html_escape(&message)
            )),
        )
            .into_response(),
    }
}

/// auth_callback
///
/// [Public Route] Completes a sign-in from the full browser URL, the only way the server sees
/// fragment-delivered tokens. The client navigates to `redirect` on success.
#[utoipa::path(
    post,
    path = "/api/auth/callback",
    request_body = CallbackRequest,
    responses(
        (status = 200, description = "Session established", body = CallbackResponse),
        (status = 400, description = "Missing or unsupported credential", body = CallbackResponse),
        (status = 401, description = "Exchange rejected", body = CallbackResponse)
    )
)]
pub async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CallbackRequest>,
) -> Response {
    let outcome = run_callback(&state, &payload.url, &headers).await;
    let cookies = cookie_headers(&state, &outcome);

    match outcome {
        CallbackOutcome::Redirected { destination, .. } => (
            StatusCode::OK,
            AppendHeaders(cookies),
            Json(CallbackResponse {
                status: CallbackStatus::Ok,
                redirect: Some(destination.to_string()),
                message: None,
            }),
        )
            .into_response(),
        CallbackOutcome::Failed { step, message } => (
            failure_status(step),
            Json(CallbackResponse {
                status: CallbackStatus::Error,
                redirect: None,
                message: Some(message),
            }),
        )
            .into_response(),
    }
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// --- Portal areas (behind the gate) ---

fn portal_home(section: &str, user: AuthUser) -> Json<PortalHome> {
    Json(PortalHome {
        section: section.to_string(),
        user_id: user.id,
        role: user.role,
        sections: access::accessible_sections(user.role),
    })
}

/// [Gated Route] Student dashboard landing.
pub async fn dashboard_home(user: AuthUser) -> Json<PortalHome> {
    portal_home("/dashboard", user)
}

/// [Gated Route] Mentor area landing.
pub async fn mentor_home(user: AuthUser) -> Json<PortalHome> {
    portal_home("/mentor", user)
}

/// [Gated Route] Admin area landing.
pub async fn admin_home(user: AuthUser) -> Json<PortalHome> {
    portal_home("/admin", user)
}

/// admin_logs_page
///
/// [Gated Route] Latest audit entries. The gate has already restricted `/admin/*` to admins.
pub async fn admin_logs_page(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AuditLog>>, StatusCode> {
    state
        .repo
        .recent_audit_logs(AUDIT_PAGE_SIZE)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// get_admin_logs
///
/// [Admin Route] JSON audit log feed. API paths sit outside the gated prefixes, so the admin
/// role is checked here.
#[utoipa::path(
    get,
    path = "/api/admin/logs",
    responses(
        (status = 200, description = "Latest audit entries", body = [AuditLog]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn get_admin_logs(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AuditLog>>, StatusCode> {
    if role != Role::Admin {
        return Err(StatusCode::FORBIDDEN);
    }
    state
        .repo
        .recent_audit_logs(AUDIT_PAGE_SIZE)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// --- Static public pages ---

const LOGIN_PAGE: &str = r#"<main>
<h1>Sign in</h1>
<p>We'll email you a one-time sign-in link.</p>
<form id="login-form">
  <label for="email">Email</label>
  <input id="email" name="email" type="email" autocomplete="email" required>
  <button type="submit">Send link</button>
</form>
<p id="login-status" role="status"></p>
</main>
<script>
document.getElementById("login-form").addEventListener("submit", async (event) => {
  event.preventDefault();
  const status = document.getElementById("login-status");
  try {
    const response = await fetch("/api/auth/login", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ email: document.getElementById("email").value }),
    });
    const body = await response.json();
    status.textContent = body.sent ? "Check your inbox for the sign-in link." : body.message;
  } catch (e) {
    status.textContent = "Could not send the sign-in link.";
  }
});
</script>"#;

pub async fn login_page() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

pub async fn unauthorized_page() -> (StatusCode, Html<&'static str>) {
    (
        StatusCode::FORBIDDEN,
        Html("<main><h1>Access denied</h1><p>Your role does not allow access to that page.</p></main>"),
    )
}
