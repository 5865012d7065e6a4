use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, StatusCode, header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::AuthError,
    identity::{Identity, IdentityState, Session},
    models::{Profile, Role},
    repository::RepositoryState,
};

/// Cookie holding the session access token (a Supabase JWT).
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
/// Cookie holding the refresh token paired with the access token.
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";
/// Cookie holding the PKCE verifier written when an OAuth sign-in was started.
pub const CODE_VERIFIER_COOKIE: &str = "sb-code-verifier";
/// Local-only developer bypass header.
pub const DEV_USER_HEADER: &str = "x-user-id";

const SUPABASE_AUDIENCE: &str = "authenticated";
const REFRESH_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 30;

/// Claims
///
/// The subset of a Supabase access token payload the portal relies on.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's UUID, also the primary key of `public.profiles`.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub aud: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Claims {
    pub fn seconds_remaining(&self) -> u64 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        (self.exp as u64).saturating_sub(now)
    }
}

/// decode_access_token
///
/// Validates signature (HS256 with the project secret), audience and expiry.
pub fn decode_access_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[SUPABASE_AUDIENCE]);
    validation.validate_exp = true;

    decode::<Claims>(token, &decoding_key, &validation).map(|data| data.claims)
}

// --- Credential extraction ---

/// Credentials
///
/// Whatever credential material an inbound request carries. Built once per request by
/// `Credentials::from_headers`; `Debug` is redacted.
#[derive(Clone, Default)]
pub struct Credentials {
    pub access_token: Option<String>,
    /// Only ever populated in `Env::Local`.
    pub dev_user: Option<Uuid>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "[redacted]"))
            .field("dev_user", &self.dev_user)
            .finish()
    }
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            dev_user: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.dev_user.is_none()
    }

    /// Bearer header first, then the session cookie. The `x-user-id` bypass is honoured
    /// only when running locally.
    pub fn from_headers(headers: &HeaderMap, env: &Env) -> Self {
        let access_token =
            extract_bearer_token(headers).or_else(|| extract_cookie(headers, ACCESS_TOKEN_COOKIE));

        let dev_user = match env {
            Env::Local => headers
                .get(DEV_USER_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| Uuid::parse_str(raw).ok()),
            Env::Production => None,
        };

        Self {
            access_token,
            dev_user,
        }
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

/// Set-Cookie values persisting an established session.
pub fn session_cookies(session: &Session, secure: bool) -> [String; 2] {
    let suffix = if secure { "; Secure" } else { "" };
    [
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            ACCESS_TOKEN_COOKIE, session.access_token, session.expires_in, suffix
        ),
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            REFRESH_TOKEN_COOKIE, session.refresh_token, REFRESH_COOKIE_MAX_AGE, suffix
        ),
    ]
}

/// Runs `fut` under `limit`; an elapsed timer becomes `AuthError::Timeout`.
pub async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(AuthError::Timeout))
}

// --- Session / role resolution ---

/// Resolution
///
/// Outcome of resolving a request's credentials. `identity == None` means unauthenticated,
/// in which case `role` is the student default and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub identity: Option<Identity>,
    pub role: Role,
    pub profile: Option<Profile>,
}

impl Resolution {
    pub fn anonymous() -> Self {
        Self::default()
    }

    fn known(identity: Identity, profile: Profile) -> Self {
        Self {
            identity: Some(identity),
            role: profile.role,
            profile: Some(profile),
        }
    }
}

/// SessionResolver
///
/// Turns request credentials into an identity plus role. Every resolution is a fresh
/// lookup against the identity provider and the profile store; nothing is cached between
/// calls. All failures (provider down, store error, timeout) resolve to "no identity".
#[derive(Clone)]
pub struct SessionResolver {
    identity: IdentityState,
    repo: RepositoryState,
    timeout: Duration,
}

impl FromRef<crate::AppState> for SessionResolver {
    fn from_ref(state: &crate::AppState) -> Self {
        SessionResolver::new(
            state.identity.clone(),
            state.repo.clone(),
            state.config.lookup_timeout,
        )
    }
}

impl SessionResolver {
    pub fn new(identity: IdentityState, repo: RepositoryState, timeout: Duration) -> Self {
        Self {
            identity,
            repo,
            timeout,
        }
    }

    pub async fn resolve(&self, credentials: &Credentials) -> Resolution {
        if let Some(user_id) = credentials.dev_user {
            // The bypass only resolves users that already have a profile.
            match bounded(self.timeout, self.repo.get_profile(user_id)).await {
                Ok(Some(profile)) => {
                    tracing::debug!(%user_id, "resolved via local x-user-id bypass");
                    let identity = Identity {
                        id: user_id,
                        email: None,
                    };
                    return Resolution::known(identity, profile);
                }
                Ok(None) => tracing::debug!(%user_id, "x-user-id bypass: no such profile"),
                Err(e) => tracing::warn!(error = %e, "x-user-id bypass lookup failed"),
            }
        }

        let Some(token) = credentials.access_token.as_deref() else {
            return Resolution::anonymous();
        };

        let identity = match bounded(self.timeout, self.identity.get_current_session(token)).await
        {
            Ok(Some(identity)) => identity,
            Ok(None) => return Resolution::anonymous(),
            Err(e) => {
                tracing::warn!(error = %e, step = "session", "identity lookup failed; treating as unauthenticated");
                return Resolution::anonymous();
            }
        };

        match bounded(self.timeout, self.repo.get_profile(identity.id)).await {
            Ok(Some(profile)) => Resolution::known(identity, profile),
            Ok(None) => self.provision(identity).await,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %identity.id, step = "profile", "profile lookup failed; treating as unauthenticated");
                Resolution::anonymous()
            }
        }
    }

    /// First sighting of an identity: create its student profile. The existence check in
    /// `resolve` plus the store's primary key keep this to one row per identity. A failed
    /// insert resolves like any other store failure: unauthenticated.
    async fn provision(&self, identity: Identity) -> Resolution {
        let full_name = identity.email.clone();
        let created = bounded(
            self.timeout,
            self.repo
                .create_profile(identity.id, Role::Student, full_name.clone()),
        )
        .await;

        match created {
            Ok(()) => {
                tracing::info!(user_id = %identity.id, "provisioned student profile");
                let profile = Profile {
                    id: identity.id,
                    role: Role::Student,
                    full_name,
                };
                Resolution::known(identity, profile)
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %identity.id, step = "provision", "profile provisioning failed; treating as unauthenticated");
                Resolution::anonymous()
            }
        }
    }
}

// --- Extractor ---

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request, for handlers that require one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl AuthUser {
    pub fn from_resolution(resolution: Resolution) -> Option<Self> {
        let identity = resolution.identity?;
        Some(AuthUser {
            id: identity.id,
            role: resolution.role,
            email: identity.email,
            full_name: resolution.profile.and_then(|p| p.full_name),
        })
    }
}

/// AuthUser Extractor Implementation
///
/// Reuses the user the gate middleware already resolved for this request when there is one;
/// otherwise resolves the request's credentials itself.
///
/// Rejection: `StatusCode::UNAUTHORIZED` when no identity can be established.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionResolver: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let config = AppConfig::from_ref(state);
        let resolver = SessionResolver::from_ref(state);

        let credentials = Credentials::from_headers(&parts.headers, &config.env);
        let resolution = resolver.resolve(&credentials).await;

        AuthUser::from_resolution(resolution).ok_or(StatusCode::UNAUTHORIZED)
    }
}
