use axum::{
    extract::{FromRef, Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    AppState,
    access::{self, Access},
    auth::{AuthUser, Credentials, SessionResolver},
    config::Env,
};

pub const LOGIN_PATH: &str = "/login";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

/// Where a denied request is sent. Locations carry no query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    Login,
    Unauthorized,
}

impl RedirectTarget {
    pub fn location(self) -> &'static str {
        match self {
            RedirectTarget::Login => LOGIN_PATH,
            RedirectTarget::Unauthorized => UNAUTHORIZED_PATH,
        }
    }
}

/// Decision
///
/// `Allow` carries the resolved user for protected paths and `None` for public ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Option<AuthUser>),
    RedirectTo(RedirectTarget),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Gate
///
/// Composition of the route classifier and the session resolver.
#[derive(Clone)]
pub struct Gate {
    resolver: SessionResolver,
    env: Env,
}

impl FromRef<AppState> for Gate {
    fn from_ref(state: &AppState) -> Self {
        Gate::new(SessionResolver::from_ref(state), state.config.env.clone())
    }
}

impl Gate {
    pub fn new(resolver: SessionResolver, env: Env) -> Self {
        Self { resolver, env }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// authorize
    ///
    /// Public paths are allowed without touching the credentials at all. Protected paths
    /// resolve the session: no identity goes to the login page, a role outside the rule's
    /// allow-set goes to the access-denied page.
    pub async fn authorize(&self, path: &str, credentials: &Credentials) -> Decision {
        let required = match access::classify(path) {
            Access::Public => return Decision::Allow(None),
            restricted => restricted,
        };

        let resolution = self.resolver.resolve(credentials).await;
        let role = resolution.role;
        let Some(user) = AuthUser::from_resolution(resolution) else {
            tracing::info!(path = %access::strip_query(path), reason = "unauthenticated", "gate redirect");
            return Decision::RedirectTo(RedirectTarget::Login);
        };

        if !required.permits(role) {
            tracing::info!(
                path = %access::strip_query(path),
                user_id = %user.id,
                role = %role,
                reason = "insufficient_role",
                "gate redirect"
            );
            return Decision::RedirectTo(RedirectTarget::Unauthorized);
        }

        Decision::Allow(Some(user))
    }
}

/// gate_middleware
///
/// Applies `Gate::authorize` to every request. An allowed protected request gets its
/// `AuthUser` stored in the request extensions for downstream extractors.
pub async fn gate_middleware(
    State(gate): State<Gate>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let credentials = Credentials::from_headers(request.headers(), gate.env());

    match gate.authorize(&path, &credentials).await {
        Decision::Allow(user) => {
            if let Some(user) = user {
                request.extensions_mut().insert(user);
            }
            next.run(request).await
        }
        Decision::RedirectTo(target) => Redirect::temporary(target.location()).into_response(),
    }
}
