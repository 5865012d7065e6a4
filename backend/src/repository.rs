use crate::{
    error::AuthError,
    models::{AuditLog, NewAuditEntry, Profile, ProfileRecord, Role},
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Repository Trait
///
/// Persistence contract for the portal-local data the auth core touches: profiles (identity
/// to role mapping) and the audit log. Errors are returned, not swallowed, so callers can
/// decide to fail closed.
///
/// **Send + Sync + async_trait** keep `Arc<dyn Repository>` usable across Axum's tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles ---
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, AuthError>;
    // Must be a no-op when a profile for `id` already exists (never updates the role).
    async fn create_profile(
        &self,
        id: Uuid,
        role: Role,
        full_name: Option<String>,
    ) -> Result<(), AuthError>;

    // --- Audit ---
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<(), AuthError>;
    // Newest first.
    async fn recent_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, AuthError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the Supabase Postgres
/// database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, AuthError> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, role, full_name FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("get_profile error: {:?}", e);
            AuthError::from(e)
        })?;

        Ok(record.map(Profile::from))
    }

    /// create_profile
    ///
    /// `ON CONFLICT (id) DO NOTHING` leans on the primary key: two concurrent first logins
    /// for the same identity produce one row and neither fails.
    async fn create_profile(
        &self,
        id: Uuid,
        role: Role,
        full_name: Option<String>,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO profiles (id, role, full_name) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(role.as_str())
        .bind(full_name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("create_profile error: {:?}", e);
            AuthError::from(e)
        })?;
        Ok(())
    }

    async fn record_audit(&self, entry: NewAuditEntry) -> Result<(), AuthError> {
        sqlx::query("INSERT INTO audit_logs (user_id, action, details) VALUES ($1, $2, $3)")
            .bind(entry.user_id)
            .bind(entry.action)
            .bind(entry.details)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("record_audit error: {:?}", e);
                AuthError::from(e)
            })?;
        Ok(())
    }

    async fn recent_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, AuthError> {
        sqlx::query_as::<_, AuditLog>(
            "SELECT id, user_id, action, details, created_at FROM audit_logs ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("recent_audit_logs error: {:?}", e);
            AuthError::from(e)
        })
    }
}
