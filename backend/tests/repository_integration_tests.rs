//! Postgres-backed repository tests. They need a reachable `DATABASE_URL` (the local
//! Supabase stack works) and run with `cargo test -- --ignored`.

use sqlx::PgPool;
use trident_portal::{
    models::{NewAuditEntry, Role},
    repository::{PostgresRepository, Repository},
};
use uuid::Uuid;

// --- Test Context and Setup ---

/// A simple structure to hold the database pool for testing
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Tests ---

#[tokio::test]
#[ignore = "requires a local Supabase Postgres"]
async fn test_create_and_get_profile() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let id = Uuid::new_v4();

    assert!(repo.get_profile(id).await.unwrap().is_none());

    repo.create_profile(id, Role::Student, Some("new@example.com".to_string()))
        .await
        .unwrap();

    let profile = repo.get_profile(id).await.unwrap().expect("profile row");
    assert_eq!(profile.role, Role::Student);
    assert_eq!(profile.full_name.as_deref(), Some("new@example.com"));
}

#[tokio::test]
#[ignore = "requires a local Supabase Postgres"]
async fn test_create_profile_never_overwrites() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let id = Uuid::new_v4();

    repo.create_profile(id, Role::Student, None).await.unwrap();
    sqlx::query("UPDATE profiles SET role = 'mentor' WHERE id = $1")
        .bind(id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    // A second first-sign-in must neither fail nor demote.
    repo.create_profile(id, Role::Student, None).await.unwrap();

    let profile = repo.get_profile(id).await.unwrap().unwrap();
    assert_eq!(profile.role, Role::Mentor);
}

#[tokio::test]
#[ignore = "requires a local Supabase Postgres"]
async fn test_concurrent_provisioning_yields_one_row() {
    let ctx = DbTestContext::setup().await;
    let id = Uuid::new_v4();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = ctx.repository();
            tokio::spawn(async move { repo.create_profile(id, Role::Student, None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore = "requires a local Supabase Postgres"]
async fn test_unknown_stored_role_reads_as_student() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let id = Uuid::new_v4();

    sqlx::query("INSERT INTO profiles (id, role) VALUES ($1, 'superuser')")
        .bind(id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let profile = repo.get_profile(id).await.unwrap().unwrap();
    assert_eq!(profile.role, Role::Student);
}

#[tokio::test]
#[ignore = "requires a local Supabase Postgres"]
async fn test_audit_log_newest_first() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user_id = Uuid::new_v4();

    for action in ["SIGN_IN_FAILED", "SIGN_IN"] {
        repo.record_audit(NewAuditEntry {
            user_id: Some(user_id),
            action: action.to_string(),
            details: serde_json::json!({ "method": "code" }),
        })
        .await
        .unwrap();
    }

    let logs = repo.recent_audit_logs(50).await.unwrap();
    let ours: Vec<_> = logs.iter().filter(|l| l.user_id == Some(user_id)).collect();
    assert_eq!(ours.len(), 2);
    assert_eq!(ours[0].action, "SIGN_IN");
    assert_eq!(ours[0].details["method"], "code");
}
