use entity_verify::{
    app_state::AppState,
    config::AppConfig,
    db,
    models::{event::audit, job::VerificationJobStatus},
    services::{job_state::JobError, redis_backend::RedisBackend},
};
use std::sync::Arc;
use uuid::Uuid;

async fn seed_entity(pool: &sqlx::PgPool, entity_id: &str, trn: &str) {
    sqlx::query("INSERT INTO entities (id, tenant_id, name, country) VALUES ($1, $2, $3, 'AE')")
        .bind(entity_id)
        .bind("tenant-integration")
        .bind("Integration Trading LLC")
        .execute(pool)
        .await
        .expect("Failed to insert entity");

    sqlx::query("INSERT INTO entity_registrations (id, entity_id, type, value) VALUES ($1, $2, 'TRN', $3)")
        .bind(format!("{entity_id}-trn"))
        .bind(entity_id)
        .bind(trn)
        .execute(pool)
        .await
        .expect("Failed to insert registration");
}

/// Integration test: full verification flow against live services
///
/// Covers:
/// 1. PostgreSQL schema and entity lookup
/// 2. Redis job state, queue and lease
/// 3. A verified and a failed entity drained by the scheduler
/// 4. Audit trail and registration status updates
/// 5. Manual review rejected on a terminal job
///
/// Note: This requires a running PostgreSQL and Redis instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let mut config = AppConfig::from_env().expect("Failed to load config");
    // Isolate keys from any running worker
    config.key_prefix = format!("entity-setup-test-{}", Uuid::new_v4());

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let backend = RedisBackend::new(&config.redis_url).expect("Failed to initialize Redis backend");
    let state = AppState::new(db_pool.clone(), Arc::new(backend), &config);
    tokio_test::assert_ok!(state.queue.health_check().await);

    let good = format!("it-{}", Uuid::new_v4());
    let bad = format!("it-{}", Uuid::new_v4());
    seed_entity(&db_pool, &good, "100067144000097").await;
    seed_entity(&db_pool, &bad, "INVALID").await;

    for id in [&good, &bad] {
        let job = state.jobs.initialize(id).await.expect("Failed to initialize job");
        assert_eq!(job.status, VerificationJobStatus::PendingVerification);
        state.queue.enqueue(id).await.expect("Failed to enqueue");
    }
    assert_eq!(state.queue.queue_depth().await.unwrap(), 2);

    let status = state
        .jobs
        .status_with_expiry(&good)
        .await
        .expect("Failed to read status")
        .expect("Job not found");
    assert!(status.expires_in > 0 && status.expires_in <= config.job_ttl_secs);

    let summary = state.scheduler(&config).run_once().await;
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(state.queue.queue_depth().await.unwrap(), 0);

    let verified = state.jobs.get(&good).await.unwrap().expect("Job not found");
    assert_eq!(verified.status, VerificationJobStatus::VerifiedSuccess);
    assert_eq!(verified.verified_registrations, vec!["TRN".to_string()]);

    let failed = state.jobs.get(&bad).await.unwrap().expect("Job not found");
    assert_eq!(failed.status, VerificationJobStatus::VerificationFailed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Invalid TRN format"));

    let entity_status: String = sqlx::query_scalar("SELECT status FROM entities WHERE id = $1")
        .bind(&good)
        .fetch_one(&db_pool)
        .await
        .unwrap();
    assert_eq!(entity_status, "VERIFIED");

    let attempts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM verification_attempts WHERE entity_id = $1")
            .bind(&bad)
            .fetch_one(&db_pool)
            .await
            .unwrap();
    assert_eq!(attempts, 1);

    let audit_types: Vec<String> = sqlx::query_scalar(
        "SELECT type FROM audit_events WHERE resource_id = $1 ORDER BY created_at",
    )
    .bind(&good)
    .fetch_all(&db_pool)
    .await
    .unwrap();
    assert_eq!(audit_types, vec![audit::VERIFICATION_SUCCESS.to_string()]);

    let err = state
        .orchestrator
        .mark_for_manual_review(&bad, "Registry unreachable")
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::TerminalState(_)), "unexpected error: {err}");

    // Cleanup
    for id in [&good, &bad] {
        sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id)
            .execute(&db_pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM verification_attempts WHERE entity_id = $1")
            .bind(id)
            .execute(&db_pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM audit_events WHERE resource_id = $1")
            .bind(id)
            .execute(&db_pool)
            .await
            .unwrap();
    }
}
