use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use serde::Deserialize;
use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use url::Url;
use uuid::Uuid;

use crate::{auth::decode_access_token, error::AuthError};

/// Identity
///
/// The authenticated subject behind a session, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
}

/// Session
///
/// Token material for an established session. `Debug` is redacted: tokens must never reach
/// a log line.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user: Identity,
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// OtpType
///
/// The fixed allow-set of one-time-code delivery types accepted by the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpType {
    Magiclink,
    Recovery,
    Signup,
    Invite,
    EmailChange,
}

impl OtpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OtpType::Magiclink => "magiclink",
            OtpType::Recovery => "recovery",
            OtpType::Signup => "signup",
            OtpType::Invite => "invite",
            OtpType::EmailChange => "email_change",
        }
    }
}

impl FromStr for OtpType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "magiclink" => Ok(OtpType::Magiclink),
            "recovery" => Ok(OtpType::Recovery),
            "signup" => Ok(OtpType::Signup),
            "invite" => Ok(OtpType::Invite),
            "email_change" => Ok(OtpType::EmailChange),
            other => Err(AuthError::UnsupportedOtpType(other.to_string())),
        }
    }
}

/// IdentityStore Contract
///
/// Everything the portal needs from the hosted identity provider: starting an email
/// sign-in, reading the identity behind an access token and the three ways of turning
/// emailed/redirected credential material into a session.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Returns `Ok(None)` when the token is not a valid session. `Err` is reserved for the
    /// provider being unreachable or answering with something malformed.
    async fn get_current_session(&self, access_token: &str) -> Result<Option<Identity>, AuthError>;

    /// Adopts an implicit-grant token pair delivered in the URL fragment.
    async fn set_session(&self, access_token: &str, refresh_token: &str)
    -> Result<Session, AuthError>;

    /// Verifies a hashed one-time code from an emailed link. Single use.
    async fn verify_one_time_code(
        &self,
        otp_type: OtpType,
        token_hash: &str,
    ) -> Result<Session, AuthError>;

    /// Emails a one-time sign-in link to `email`. The link lands on `redirect_to`, which must
    /// be an allowed redirect URL of the project. Unknown addresses get an account created.
    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> Result<(), AuthError>;

    /// PKCE authorization-code exchange. `callback_url` is the full URL the provider
    /// redirected to; `code_verifier` is the verifier stored when the flow started. Single use.
    async fn exchange_authorization_code(
        &self,
        callback_url: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, AuthError>;
}

/// IdentityState
///
/// The concrete type used to share the identity integration across the application state.
pub type IdentityState = Arc<dyn IdentityStore>;

// --- Supabase implementation ---

/// Token endpoint payload returned by `/auth/v1/token` and `/auth/v1/verify`.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: Uuid,
    email: Option<String>,
}

/// Error body shapes GoTrue answers with; only the description is kept.
#[derive(Deserialize, Default)]
struct ProviderError {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl From<TokenResponse> for Session {
    fn from(t: TokenResponse) -> Self {
        Session {
            user: Identity {
                id: t.user.id,
                email: t.user.email,
            },
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_in: t.expires_in,
        }
    }
}

/// SupabaseIdentityClient
///
/// Talks to the Supabase Auth (GoTrue) REST API. Access tokens are validated locally with the
/// project's JWT secret; the exchanges are HTTP calls authenticated with the anon key.
#[derive(Clone)]
pub struct SupabaseIdentityClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    jwt_secret: String,
}

impl SupabaseIdentityClient {
    pub fn new(base_url: &str, anon_key: &str, jwt_secret: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            jwt_secret: jwt_secret.to_string(),
        }
    }

    /// POSTs `body` to a GoTrue endpoint and decodes a session out of the response.
    async fn token_request(
        &self,
        step: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        let response = reject_failure(step, response).await?;

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|_| AuthError::IdentityUnavailable("malformed token response".into()))?;
        Ok(tokens.into())
    }
}

/// Turns a non-2xx GoTrue answer into an `Exchange` error carrying its description.
async fn reject_failure(
    step: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let err = response.json::<ProviderError>().await.unwrap_or_default();
    let message = err
        .error_description
        .or(err.msg)
        .or(err.message)
        .unwrap_or_else(|| format!("provider answered {}", status));
    Err(AuthError::Exchange { step, message })
}

#[async_trait]
impl IdentityStore for SupabaseIdentityClient {
    async fn get_current_session(&self, access_token: &str) -> Result<Option<Identity>, AuthError> {
        match decode_access_token(access_token, &self.jwt_secret) {
            Ok(claims) => Ok(Some(Identity {
                id: claims.sub,
                email: claims.email,
            })),
            Err(e) => {
                tracing::debug!(reason = ?e.kind(), "access token rejected");
                Ok(None)
            }
        }
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, AuthError> {
        match decode_access_token(access_token, &self.jwt_secret) {
            Ok(claims) => {
                let expires_in = claims.seconds_remaining();
                Ok(Session {
                    user: Identity {
                        id: claims.sub,
                        email: claims.email,
                    },
                    access_token: access_token.to_string(),
                    refresh_token: refresh_token.to_string(),
                    expires_in,
                })
            }
            // An expired access token is normal for a stale link; the refresh token decides.
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                self.token_request(
                    "fragment",
                    "/auth/v1/token?grant_type=refresh_token",
                    serde_json::json!({ "refresh_token": refresh_token }),
                )
                .await
            }
            Err(_) => Err(AuthError::Exchange {
                step: "fragment",
                message: "access token failed validation".into(),
            }),
        }
    }

    async fn verify_one_time_code(
        &self,
        otp_type: OtpType,
        token_hash: &str,
    ) -> Result<Session, AuthError> {
        self.token_request(
            "token_hash",
            "/auth/v1/verify",
            serde_json::json!({ "type": otp_type.as_str(), "token_hash": token_hash }),
        )
        .await
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let mut endpoint = Url::parse(&format!("{}/auth/v1/otp", self.base_url))
            .map_err(|_| AuthError::IdentityUnavailable("invalid provider URL".into()))?;
        endpoint
            .query_pairs_mut()
            .append_pair("redirect_to", redirect_to);

        let response = self
            .http
            .post(endpoint)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "create_user": true }))
            .send()
            .await?;

        reject_failure("magic_link", response).await?;
        Ok(())
    }

    async fn exchange_authorization_code(
        &self,
        callback_url: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, AuthError> {
        let url = Url::parse(callback_url).map_err(|_| AuthError::MalformedUrl)?;
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .ok_or(AuthError::MissingCredential)?;
        let code_verifier = code_verifier.ok_or_else(|| AuthError::Exchange {
            step: "code",
            message: "missing PKCE code verifier".into(),
        })?;

        self.token_request(
            "code",
            "/auth/v1/token?grant_type=pkce",
            serde_json::json!({ "auth_code": code, "code_verifier": code_verifier }),
        )
        .await
    }
}

// --- Mock implementation ---

/// Call counters shared between clones of a `MockIdentityStore`.
#[derive(Default)]
struct MockCalls {
    lookups: AtomicUsize,
    set_session: AtomicUsize,
    verify: AtomicUsize,
    code: AtomicUsize,
    magic_links: Mutex<Vec<(String, String)>>,
}

/// MockIdentityStore
///
/// In-memory identity provider for tests and offline wiring. Known access tokens map to
/// identities; every exchange either yields the configured session (which then becomes a
/// known token) or fails. Clones share state and counters.
#[derive(Clone, Default)]
pub struct MockIdentityStore {
    users: Arc<Mutex<HashMap<String, Identity>>>,
    session: Option<Session>,
    calls: Arc<MockCalls>,
    /// When true, every call returns a simulated provider failure.
    pub should_fail: bool,
    /// Artificial latency applied before answering.
    pub delay: Option<Duration>,
}

impl MockIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn with_user(self, access_token: &str, identity: Identity) -> Self {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(access_token.to_string(), identity);
        self
    }

    /// Session handed out by any successful exchange.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.calls.lookups.load(Ordering::SeqCst)
    }

    pub fn set_session_count(&self) -> usize {
        self.calls.set_session.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> usize {
        self.calls.verify.load(Ordering::SeqCst)
    }

    pub fn code_exchange_count(&self) -> usize {
        self.calls.code.load(Ordering::SeqCst)
    }

    /// `(email, redirect_to)` of every sign-in link sent so far.
    pub fn magic_links(&self) -> Vec<(String, String)> {
        self.calls
            .magic_links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn magic_link_count(&self) -> usize {
        self.magic_links().len()
    }

    pub fn exchange_count(&self) -> usize {
        self.set_session_count() + self.verify_count() + self.code_exchange_count()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn exchange(&self, step: &'static str) -> Result<Session, AuthError> {
        if self.should_fail {
            return Err(AuthError::Exchange {
                step,
                message: "Mock Identity Error: Simulation requested".into(),
            });
        }
        let session = self.session.clone().ok_or_else(|| AuthError::Exchange {
            step,
            message: "credential already used or unknown".into(),
        })?;
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.access_token.clone(), session.user.clone());
        Ok(session)
    }
}

#[async_trait]
impl IdentityStore for MockIdentityStore {
    async fn get_current_session(&self, access_token: &str) -> Result<Option<Identity>, AuthError> {
        self.calls.lookups.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.should_fail {
            return Err(AuthError::IdentityUnavailable("mock outage".into()));
        }
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(access_token)
            .cloned())
    }

    async fn set_session(
        &self,
        _access_token: &str,
        _refresh_token: &str,
    ) -> Result<Session, AuthError> {
        self.calls.set_session.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.exchange("fragment")
    }

    async fn verify_one_time_code(
        &self,
        _otp_type: OtpType,
        _token_hash: &str,
    ) -> Result<Session, AuthError> {
        self.calls.verify.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.exchange("token_hash")
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        self.pause().await;
        if self.should_fail {
            return Err(AuthError::Exchange {
                step: "magic_link",
                message: "Mock Identity Error: Simulation requested".into(),
            });
        }
        self.calls
            .magic_links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((email.to_string(), redirect_to.to_string()));
        Ok(())
    }

    async fn exchange_authorization_code(
        &self,
        _callback_url: &str,
        _code_verifier: Option<&str>,
    ) -> Result<Session, AuthError> {
        self.calls.code.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.exchange("code")
    }
}
