#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};
use trident_portal::{
    AppState, AuthError,
    auth::Claims,
    config::{AppConfig, Env},
    identity::{Identity, IdentityState, Session, SupabaseIdentityClient},
    models::{AuditLog, NewAuditEntry, Profile, Role},
    repository::{Repository, RepositoryState},
};
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";

// --- Mock Repository ---

/// In-memory profile store with the same "insert unless present" semantics as the
/// Postgres `ON CONFLICT DO NOTHING` insert.
#[derive(Default)]
pub struct MockProfileRepo {
    profiles: Mutex<HashMap<Uuid, Profile>>,
    audit: Mutex<Vec<NewAuditEntry>>,
    lookups: AtomicUsize,
    creates: AtomicUsize,
    pub fail_lookups: bool,
    pub fail_creates: bool,
    pub fail_audit: bool,
    pub delay: Option<Duration>,
}

impl MockProfileRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_lookups() -> Self {
        Self {
            fail_lookups: true,
            ..Self::default()
        }
    }

    pub fn failing_creates() -> Self {
        Self {
            fail_creates: true,
            ..Self::default()
        }
    }

    pub fn failing_audit() -> Self {
        Self {
            fail_audit: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_profile(self, id: Uuid, role: Role) -> Self {
        self.profiles.lock().unwrap().insert(
            id,
            Profile {
                id,
                role,
                full_name: Some(format!("user-{}", role)),
            },
        );
        self
    }

    /// Out-of-band role change, as an admin editing the profiles table would do.
    pub fn set_role(&self, id: Uuid, role: Role) {
        if let Some(profile) = self.profiles.lock().unwrap().get_mut(&id) {
            profile.role = role;
        }
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }

    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        self.profiles.lock().unwrap().get(&id).cloned()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.audit.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for MockProfileRepo {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, AuthError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookups {
            return Err(AuthError::Store("mock store down".into()));
        }
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn create_profile(
        &self,
        id: Uuid,
        role: Role,
        full_name: Option<String>,
    ) -> Result<(), AuthError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates {
            return Err(AuthError::Store("insert rejected".into()));
        }
        self.profiles
            .lock()
            .unwrap()
            .entry(id)
            .or_insert(Profile {
                id,
                role,
                full_name,
            });
        Ok(())
    }

    async fn record_audit(&self, entry: NewAuditEntry) -> Result<(), AuthError> {
        if self.fail_audit {
            return Err(AuthError::Store("audit table missing".into()));
        }
        self.audit.lock().unwrap().push(entry);
        Ok(())
    }

    async fn recent_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, AuthError> {
        let entries = self.audit.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .take(limit as usize)
            .enumerate()
            .map(|(i, e)| AuditLog {
                id: i as i64 + 1,
                user_id: e.user_id,
                action: e.action.clone(),
                details: e.details.clone(),
                created_at: chrono::Utc::now(),
            })
            .collect())
    }
}

// --- Helper Functions ---

/// Signs a Supabase-shaped access token expiring `exp_offset` seconds from now.
pub fn create_token(user_id: Uuid, email: Option<&str>, exp_offset: i64) -> String {
    create_token_with_secret(user_id, email, exp_offset, TEST_JWT_SECRET)
}

pub fn create_token_with_secret(
    user_id: Uuid,
    email: Option<&str>,
    exp_offset: i64,
    secret: &str,
) -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + exp_offset) as usize,
        aud: "authenticated".to_string(),
        email: email.map(str::to_string),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

/// Identity client that validates tokens locally; its HTTP endpoint is never contacted by
/// `get_current_session`.
pub fn jwt_identity() -> IdentityState {
    Arc::new(SupabaseIdentityClient::new(
        "http://127.0.0.1:9",
        "anon",
        TEST_JWT_SECRET,
    ))
}

pub fn test_config(env: Env) -> AppConfig {
    let mut config = AppConfig::default();
    config.env = env;
    config.jwt_secret = TEST_JWT_SECRET.to_string();
    config.lookup_timeout = Duration::from_millis(200);
    config
}

pub fn app_state(repo: Arc<MockProfileRepo>, identity: IdentityState, env: Env) -> AppState {
    AppState {
        repo: repo as RepositoryState,
        identity,
        config: test_config(env),
    }
}

pub fn session_for(user_id: Uuid, access_token: &str) -> Session {
    Session {
        user: Identity {
            id: user_id,
            email: Some("new@student.example".to_string()),
        },
        access_token: access_token.to_string(),
        refresh_token: "refresh-token".to_string(),
        expires_in: 3600,
    }
}
