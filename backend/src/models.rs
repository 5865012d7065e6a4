use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Roles ---

/// Role
///
/// Privilege tier of an authenticated user. Variants are declared in privilege order so the
/// derived `Ord` gives `Student < Mentor < Admin`; access checks themselves only use set
/// membership (see `access::RouteRule`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, TS, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    Student,
    Mentor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Mentor, Role::Admin];

    /// decode
    ///
    /// Total decoding of a stored or transmitted role. Anything missing or unrecognised maps
    /// to the lowest-privilege variant, so a malformed value can never escalate privilege.
    pub fn decode(raw: Option<&str>) -> Role {
        match raw {
            Some("admin") => Role::Admin,
            Some("mentor") => Role::Mentor,
            _ => Role::Student,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Admin => "admin",
        }
    }

    /// Landing page the callback sends a freshly signed-in user of this role to.
    pub fn home(self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Mentor => "/mentor",
            Role::Student => "/dashboard",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Deserialization goes through `Role::decode` so it can never fail on an unknown string.
impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Role::decode(raw.as_deref()))
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// ProfileRecord
///
/// Raw row from `public.profiles`. The role column is free text in the database, so it is
/// read as a string and decoded into `Profile`.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub role: Option<String>,
    pub full_name: Option<String>,
}

/// Profile
///
/// Portal-local record mapping an identity to a role and display name.
/// Exactly one exists per authenticated identity; the resolver creates it lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub role: Role,
    pub full_name: Option<String>,
}

impl From<ProfileRecord> for Profile {
    fn from(record: ProfileRecord) -> Self {
        Profile {
            id: record.id,
            role: Role::decode(record.role.as_deref()),
            full_name: record.full_name,
        }
    }
}

/// AuditLog
///
/// A row of `public.audit_logs`, as listed on the admin logs page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct AuditLog {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub action: String,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// NewAuditEntry
///
/// Insert payload for the audit log. `details` must never contain credential material.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
}

// --- Response Payloads (Output Schemas) ---

/// WhoAmIResponse
///
/// Body of `GET /api/auth/whoami`. Anonymous callers only get `authenticated: false`.
/// `sections` lists the gated portal areas the role may open, for conditional UI rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct WhoAmIResponse {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub sections: Vec<String>,
}

/// PortalHome
///
/// Landing payload for the gated `/dashboard`, `/mentor` and `/admin` areas.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PortalHome {
    pub section: String,
    pub user_id: Uuid,
    pub role: Role,
    pub sections: Vec<String>,
}

/// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Input for `POST /api/auth/login`: the address the sign-in link is emailed to.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[schema(example = "student@university.example")]
    pub email: String,
}

impl LoginRequest {
    /// Trimmed address, or `None` when it cannot be an email address at all.
    pub fn address(&self) -> Option<&str> {
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Some(email),
            _ => None,
        }
    }
}

/// LoginResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// CallbackRequest
///
/// Input for `POST /api/auth/callback`. The browser posts its full location, because the
/// fragment (implicit-grant tokens) is never sent to the server on a plain GET.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CallbackRequest {
    #[schema(example = "https://portal.example/auth/callback?code=abc")]
    pub url: String,
}

/// CallbackStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum CallbackStatus {
    Ok,
    Error,
}

/// CallbackResponse
///
/// Outcome of a callback run. On success `redirect` is the role home to navigate to; on
/// failure `message` is a diagnostic and the client stays on the callback screen.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CallbackResponse {
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
