//! Auth callback state machine.
//!
//! Completes an email-link or OAuth sign-in: picks exactly one of the three credential
//! shapes a callback URL can carry, exchanges it for a session, then looks up the role to
//! pick a landing page. Each page load gets its own `AuthCallback`, whose run-once guard
//! keeps single-use codes from being exchanged twice.

use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::OnceCell;
use url::Url;

use crate::{
    auth::{Credentials, SessionResolver, bounded},
    error::AuthError,
    identity::{IdentityState, OtpType, Session},
    models::{NewAuditEntry, Role, WhoAmIResponse},
};

/// CallbackCredential
///
/// The credential material found in a callback URL. Selection is strictly prioritised:
/// fragment token pair, then query `token_hash` + `type`, then query `code`.
#[derive(Clone, PartialEq, Eq)]
pub enum CallbackCredential {
    Fragment {
        access_token: String,
        refresh_token: String,
    },
    TokenHash {
        otp_type: OtpType,
        token_hash: String,
    },
    AuthorizationCode {
        code: String,
    },
}

impl std::fmt::Debug for CallbackCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackCredential::TokenHash { otp_type, .. } => f
                .debug_struct("TokenHash")
                .field("otp_type", otp_type)
                .finish_non_exhaustive(),
            other => f.write_str(other.method()),
        }
    }
}

impl CallbackCredential {
    /// select
    ///
    /// Picks the first shape present. Once the `token_hash` branch is chosen an unknown
    /// `type` is fatal; it never falls through to the `code` branch.
    pub fn select(url: &Url) -> Result<Self, AuthError> {
        let fragment: Vec<(String, String)> = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        if let (Some(access_token), Some(refresh_token)) = (
            param(&fragment, "access_token"),
            param(&fragment, "refresh_token"),
        ) {
            return Ok(CallbackCredential::Fragment {
                access_token,
                refresh_token,
            });
        }

        if let (Some(token_hash), Some(raw_type)) =
            (param(&query, "token_hash"), param(&query, "type"))
        {
            let otp_type = raw_type.parse::<OtpType>()?;
            return Ok(CallbackCredential::TokenHash {
                otp_type,
                token_hash,
            });
        }

        if let Some(code) = param(&query, "code") {
            return Ok(CallbackCredential::AuthorizationCode { code });
        }

        Err(AuthError::MissingCredential)
    }

    /// Whether a query string alone carries credential material. Fragments never reach
    /// the server, so a GET callback without any of these has to be finished in the browser.
    pub fn in_query(query: Option<&str>) -> bool {
        let pairs: Vec<(String, String)> = query
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let token_hash = param(&pairs, "token_hash").is_some() && param(&pairs, "type").is_some();
        token_hash || param(&pairs, "code").is_some()
    }

    /// Short name of the branch, safe to log and audit.
    pub fn method(&self) -> &'static str {
        match self {
            CallbackCredential::Fragment { .. } => "fragment",
            CallbackCredential::TokenHash { .. } => "token_hash",
            CallbackCredential::AuthorizationCode { .. } => "code",
        }
    }
}

fn param(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.clone())
}

/// CallbackState
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackState {
    Start,
    FragmentExchange,
    HashExchange,
    CodeExchange,
    SessionEstablished,
    RoleLookup,
    Redirected {
        role: Role,
        destination: &'static str,
    },
    Failed {
        step: &'static str,
        message: String,
    },
}

/// CallbackOutcome
///
/// Terminal result of a run. `Failed` means no redirect: the user stays on the callback
/// screen with `message` and recovers by going back to sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Redirected {
        session: Session,
        role: Role,
        destination: &'static str,
        method: &'static str,
    },
    Failed {
        step: &'static str,
        message: String,
    },
}

impl CallbackOutcome {
    /// Audit row for this outcome. Only the branch, role and failing step are recorded.
    pub fn audit_entry(&self) -> NewAuditEntry {
        match self {
            CallbackOutcome::Redirected {
                session,
                role,
                method,
                ..
            } => NewAuditEntry {
                user_id: Some(session.user.id),
                action: "SIGN_IN".to_string(),
                details: serde_json::json!({ "method": method, "role": role }),
            },
            CallbackOutcome::Failed { step, .. } => NewAuditEntry {
                user_id: None,
                action: "SIGN_IN_FAILED".to_string(),
                details: serde_json::json!({ "step": step }),
            },
        }
    }
}

// --- Role lookup sources ---

/// RoleLookup
///
/// Authoritative, uncached role read for a freshly established session.
/// `Ok(None)` means the source had no role to give; the machine then uses student.
#[async_trait]
pub trait RoleLookup: Send + Sync {
    async fn lookup_role(&self, session: &Session) -> Result<Option<Role>, AuthError>;
}

/// In-process lookup: a fresh resolution of the new access token (provisioning the
/// profile on first sign-in, like `/api/auth/whoami` does).
pub struct ResolverRoleLookup {
    resolver: SessionResolver,
}

impl ResolverRoleLookup {
    pub fn new(resolver: SessionResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl RoleLookup for ResolverRoleLookup {
    async fn lookup_role(&self, session: &Session) -> Result<Option<Role>, AuthError> {
        let resolution = self
            .resolver
            .resolve(&Credentials::bearer(session.access_token.clone()))
            .await;
        Ok(resolution.identity.map(|_| resolution.role))
    }
}

/// WhoAmIClient
///
/// Out-of-process lookup against a portal's `GET /api/auth/whoami`.
#[derive(Clone)]
pub struct WhoAmIClient {
    http: reqwest::Client,
    url: String,
}

impl WhoAmIClient {
    /// `base_url` is the portal origin, e.g. `https://portal.example`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/api/auth/whoami", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl RoleLookup for WhoAmIClient {
    async fn lookup_role(&self, session: &Session) -> Result<Option<Role>, AuthError> {
        let response = self
            .http
            .get(&self.url)
            .bearer_auth(&session.access_token)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::IdentityUnavailable(format!(
                "whoami answered {}",
                response.status()
            )));
        }

        let body = response
            .json::<WhoAmIResponse>()
            .await
            .map_err(|_| AuthError::IdentityUnavailable("malformed whoami response".into()))?;

        Ok(body.authenticated.then_some(body.role).flatten())
    }
}

// --- The machine ---

/// AuthCallback
///
/// One instance per callback page load. `run` executes the machine at most once; later
/// calls return the first outcome without touching the identity provider again.
pub struct AuthCallback {
    identity: IdentityState,
    roles: Arc<dyn RoleLookup>,
    timeout: Duration,
    history: Mutex<Vec<CallbackState>>,
    outcome: OnceCell<CallbackOutcome>,
}

impl AuthCallback {
    pub fn new(identity: IdentityState, roles: Arc<dyn RoleLookup>, timeout: Duration) -> Self {
        Self {
            identity,
            roles,
            timeout,
            history: Mutex::new(vec![CallbackState::Start]),
            outcome: OnceCell::new(),
        }
    }

    pub fn state(&self) -> CallbackState {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap_or(CallbackState::Start)
    }

    /// Every state visited so far, starting with `Start`.
    pub fn history(&self) -> Vec<CallbackState> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_run(&self) -> bool {
        self.outcome.initialized()
    }

    pub async fn run(&self, callback_url: &str, code_verifier: Option<&str>) -> CallbackOutcome {
        if self.has_run() {
            tracing::debug!("auth callback already ran for this page load; ignoring re-invocation");
        }
        self.outcome
            .get_or_init(|| self.execute(callback_url, code_verifier))
            .await
            .clone()
    }

    async fn execute(&self, callback_url: &str, code_verifier: Option<&str>) -> CallbackOutcome {
        let credential = match Url::parse(callback_url)
            .map_err(|_| AuthError::MalformedUrl)
            .and_then(|url| CallbackCredential::select(&url))
        {
            Ok(credential) => credential,
            Err(e) => return self.fail("credential", e),
        };
        let method = credential.method();

        let exchanged = match &credential {
            CallbackCredential::Fragment {
                access_token,
                refresh_token,
            } => {
                self.transition(CallbackState::FragmentExchange);
                bounded(
                    self.timeout,
                    self.identity.set_session(access_token, refresh_token),
                )
                .await
            }
            CallbackCredential::TokenHash {
                otp_type,
                token_hash,
            } => {
                self.transition(CallbackState::HashExchange);
                bounded(
                    self.timeout,
                    self.identity.verify_one_time_code(*otp_type, token_hash),
                )
                .await
            }
            CallbackCredential::AuthorizationCode { .. } => {
                self.transition(CallbackState::CodeExchange);
                bounded(
                    self.timeout,
                    self.identity
                        .exchange_authorization_code(callback_url, code_verifier),
                )
                .await
            }
        };

        let session = match exchanged {
            Ok(session) => session,
            Err(e) => return self.fail(method, e),
        };
        self.transition(CallbackState::SessionEstablished);

        self.transition(CallbackState::RoleLookup);
        let role = match bounded(self.timeout, self.roles.lookup_role(&session)).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                tracing::warn!(user_id = %session.user.id, "role lookup returned no role; defaulting to student");
                Role::Student
            }
            Err(e) => {
                tracing::warn!(user_id = %session.user.id, error = %e, "role lookup failed; defaulting to student");
                Role::Student
            }
        };

        let destination = role.home();
        self.transition(CallbackState::Redirected { role, destination });
        tracing::info!(user_id = %session.user.id, %role, method, destination, "sign-in complete");

        CallbackOutcome::Redirected {
            session,
            role,
            destination,
            method,
        }
    }

    fn transition(&self, next: CallbackState) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(next);
    }

    fn fail(&self, step: &'static str, error: AuthError) -> CallbackOutcome {
        let message = error.to_string();
        tracing::error!(step, error = %message, "auth callback failure");
        self.transition(CallbackState::Failed {
            step,
            message: message.clone(),
        });
        CallbackOutcome::Failed { step, message }
    }
}
