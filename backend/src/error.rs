use thiserror::Error;

/// AuthError
///
/// Failure taxonomy shared by the identity integration, the profile store and the
/// callback state machine. Display strings are surfaced to users and written to logs,
/// so no variant ever carries token, token-hash or code material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// An external call exceeded `AppConfig::lookup_timeout`.
    #[error("external call timed out")]
    Timeout,

    /// The identity provider could not be reached or answered with garbage.
    #[error("identity provider unavailable: {0}")]
    IdentityUnavailable(String),

    /// The presented access token failed validation (signature, audience, expiry).
    #[error("invalid or expired session token")]
    InvalidToken,

    /// One of the three credential exchanges was rejected.
    #[error("{step} exchange failed: {message}")]
    Exchange { step: &'static str, message: String },

    /// `type` query parameter outside the one-time-code allow-set.
    #[error("unsupported one-time code type: {0}")]
    UnsupportedOtpType(String),

    #[error("no tokens, token_hash, or code present in callback URL")]
    MissingCredential,

    /// The callback URL itself could not be parsed.
    #[error("malformed callback URL")]
    MalformedUrl,

    /// Profile or audit store failure.
    #[error("store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors may embed the request URL; strip it so query credentials never leak.
        AuthError::IdentityUnavailable(e.without_url().to_string())
    }
}
