//! Webhook replay and sync session recovery integration tests.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{test_workspace, webhook_event, TestHarness};
use redemption_engine::models::{
    EntityCursor, RecoveryMode, SyncRecoveryRequest, SyncSession, SyncSessionStatus,
    WebhookProcessingStatus, WebhookReplayRequest,
};
use redemption_engine::services::LedgerStore;
use redemption_engine::EngineError;
use uuid::Uuid;

fn replay_request(event_id: Uuid, force: bool) -> WebhookReplayRequest {
    WebhookReplayRequest {
        provider: "chainpay".to_string(),
        event_id,
        force_replay: force,
        requested_by: Some("ops@example.com".to_string()),
    }
}

fn recovery_request(session_id: Uuid, mode: RecoveryMode) -> SyncRecoveryRequest {
    SyncRecoveryRequest {
        session_id,
        mode,
        requested_by: Some("ops@example.com".to_string()),
    }
}

async fn seed_recoverable_session(harness: &TestHarness) -> SyncSession {
    let mut session = SyncSession::new(
        test_workspace(),
        "chainpay",
        vec!["customers".to_string(), "invoices".to_string()],
        Utc::now(),
    );
    session.status = SyncSessionStatus::Recoverable;
    session.cursors.insert(
        "customers".to_string(),
        EntityCursor {
            cursor: Some("c-50".to_string()),
            completed: true,
        },
    );
    session.cursors.insert(
        "invoices".to_string(),
        EntityCursor {
            cursor: Some("i-10".to_string()),
            completed: false,
        },
    );
    harness.store.insert_sync_session(&session).await.unwrap();
    session
}

#[tokio::test]
async fn replaying_a_processed_event_is_an_idempotent_noop() {
    let harness = TestHarness::new();
    let event = webhook_event(WebhookProcessingStatus::Processed, 1);
    harness.store.insert_webhook_event(&event).await.unwrap();

    for _ in 0..2 {
        let response = harness
            .recovery
            .replay_webhook_event(replay_request(event.event_id, false))
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.replay_event_id.is_none());
    }

    // The pipeline never ran and no attempt record was created.
    assert_eq!(harness.webhook_processor.call_count().await, 0);
    let attempts = harness
        .store
        .list_webhook_attempts(event.event_id)
        .await
        .unwrap();
    assert!(attempts.is_empty());
}

#[tokio::test]
async fn replaying_a_failed_event_appends_a_new_attempt() {
    let harness = TestHarness::new();
    let mut event = webhook_event(WebhookProcessingStatus::Failed, 1);
    event.last_error = Some("boom".to_string());
    harness.store.insert_webhook_event(&event).await.unwrap();

    let response = harness
        .recovery
        .replay_webhook_event(replay_request(event.event_id, false))
        .await
        .unwrap();

    assert!(response.success);
    let attempt_id = response.replay_event_id.expect("attempt recorded");

    let attempts = harness
        .store
        .list_webhook_attempts(event.event_id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_id, attempt_id);
    assert!(attempts[0].replayed);
    assert!(attempts[0].succeeded);
    assert_eq!(
        attempts[0].requested_by.as_deref(),
        Some("ops@example.com")
    );

    let updated = harness
        .store
        .get_webhook_event(event.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, WebhookProcessingStatus::Processed);
    assert_eq!(updated.attempt_count, 2);
    assert_eq!(updated.last_error, None);
}

#[tokio::test]
async fn force_replay_reprocesses_an_already_processed_event() {
    let harness = TestHarness::new();
    let event = webhook_event(WebhookProcessingStatus::Processed, 1);
    harness.store.insert_webhook_event(&event).await.unwrap();

    let response = harness
        .recovery
        .replay_webhook_event(replay_request(event.event_id, true))
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.replay_event_id.is_some());
    assert_eq!(harness.webhook_processor.call_count().await, 1);
}

#[tokio::test]
async fn failed_replay_surfaces_the_error_and_preserves_history() {
    let harness = TestHarness::new();
    let event = webhook_event(WebhookProcessingStatus::Failed, 1);
    harness.store.insert_webhook_event(&event).await.unwrap();
    harness
        .webhook_processor
        .push_failure("provider rejected payload")
        .await;

    let response = harness
        .recovery
        .replay_webhook_event(replay_request(event.event_id, false))
        .await
        .unwrap();

    assert!(!response.success);
    assert!(response
        .error
        .as_deref()
        .is_some_and(|e| e.contains("provider rejected payload")));

    let updated = harness
        .store
        .get_webhook_event(event.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, WebhookProcessingStatus::Failed);
    assert_eq!(updated.attempt_count, 2);

    let attempts = harness
        .store
        .list_webhook_attempts(event.event_id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].succeeded);
}

#[tokio::test]
async fn replay_failure_at_the_attempt_budget_parks_the_event() {
    let harness = TestHarness::new();
    // One failure away from the configured budget of five.
    let event = webhook_event(WebhookProcessingStatus::Failed, 4);
    harness.store.insert_webhook_event(&event).await.unwrap();
    harness.webhook_processor.push_failure("still broken").await;

    let response = harness
        .recovery
        .replay_webhook_event(replay_request(event.event_id, false))
        .await
        .unwrap();
    assert!(!response.success);

    let updated = harness
        .store
        .get_webhook_event(event.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, WebhookProcessingStatus::Exhausted);
}

#[tokio::test]
async fn replay_validates_event_and_provider() {
    let harness = TestHarness::new();

    let err = harness
        .recovery
        .replay_webhook_event(replay_request(Uuid::new_v4(), false))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let event = webhook_event(WebhookProcessingStatus::Failed, 1);
    harness.store.insert_webhook_event(&event).await.unwrap();
    let mut request = replay_request(event.event_id, false);
    request.provider = "otherpay".to_string();
    let err = harness
        .recovery
        .replay_webhook_event(request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn resume_continues_only_unfinished_entity_types_from_their_cursors() {
    let harness = TestHarness::new();
    let session = seed_recoverable_session(&harness).await;

    let response = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap();

    assert!(response.success);
    let calls = harness.entity_syncer.calls().await;
    assert_eq!(calls, vec![("invoices".to_string(), Some("i-10".to_string()))]);

    let recovered = harness
        .store
        .get_sync_session(session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.status, SyncSessionStatus::Completed);
    assert!(recovered.recovered);
    assert_eq!(
        recovered.cursors.get("invoices").unwrap().cursor.as_deref(),
        Some("invoices-end")
    );
    assert!(recovered.cursors.get("invoices").unwrap().completed);
}

#[tokio::test]
async fn restart_resets_cursors_and_reprocesses_everything() {
    let harness = TestHarness::new();
    let session = seed_recoverable_session(&harness).await;

    let response = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Restart))
        .await
        .unwrap();

    assert!(response.success);
    let mut calls = harness.entity_syncer.calls().await;
    calls.sort();
    assert_eq!(
        calls,
        vec![
            ("customers".to_string(), None),
            ("invoices".to_string(), None)
        ]
    );
}

#[tokio::test]
async fn recovery_of_a_running_session_is_rejected() {
    let harness = TestHarness::new();
    let session = SyncSession::new(
        test_workspace(),
        "chainpay",
        vec!["customers".to_string()],
        Utc::now(),
    );
    harness.store.insert_sync_session(&session).await.unwrap();

    let err = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RecoveryConflict(_)));
    assert_eq!(harness.entity_syncer.calls().await.len(), 0);
}

#[tokio::test]
async fn recovery_of_a_normally_completed_session_is_rejected() {
    let harness = TestHarness::new();
    let mut session = SyncSession::new(
        test_workspace(),
        "chainpay",
        vec!["customers".to_string()],
        Utc::now(),
    );
    session.status = SyncSessionStatus::Completed;
    harness.store.insert_sync_session(&session).await.unwrap();

    let err = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RecoveryConflict(_)));
}

#[tokio::test]
async fn repeating_recovery_after_success_is_a_noop() {
    let harness = TestHarness::new();
    let session = seed_recoverable_session(&harness).await;

    let first = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap();
    assert!(first.success);

    let second = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap();
    assert!(second.success);
    // The syncer only ever ran for the first request.
    assert_eq!(harness.entity_syncer.calls().await.len(), 1);
}

#[tokio::test]
async fn failed_recovery_leaves_the_session_recoverable() {
    let harness = TestHarness::new();
    let session = seed_recoverable_session(&harness).await;
    harness
        .entity_syncer
        .fail_entity("invoices", "provider 500")
        .await;

    let response = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.error.is_some());

    let after = harness
        .store
        .get_sync_session(session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, SyncSessionStatus::Recoverable);
    assert!(after.error_message.is_some());

    // The operator can try again once the provider recovers.
    harness.entity_syncer.clear_failures().await;
    let retry = harness
        .recovery
        .recover_sync_session(recovery_request(session.session_id, RecoveryMode::Resume))
        .await
        .unwrap();
    assert!(retry.success);
}

#[tokio::test]
async fn dlq_stats_aggregate_per_workspace_and_provider() {
    let harness = TestHarness::new();
    let since = Utc::now() - ChronoDuration::days(7);

    for status in [
        WebhookProcessingStatus::Processed,
        WebhookProcessingStatus::Processed,
        WebhookProcessingStatus::Failed,
        WebhookProcessingStatus::Exhausted,
    ] {
        harness
            .store
            .insert_webhook_event(&webhook_event(status, 1))
            .await
            .unwrap();
    }

    // Different workspace and stale events are out of range.
    let mut foreign = webhook_event(WebhookProcessingStatus::Failed, 1);
    foreign.workspace_id = Uuid::new_v4();
    harness.store.insert_webhook_event(&foreign).await.unwrap();
    let mut stale = webhook_event(WebhookProcessingStatus::Failed, 1);
    stale.received_utc = since - ChronoDuration::days(1);
    harness.store.insert_webhook_event(&stale).await.unwrap();

    let stats = harness
        .recovery
        .dlq_stats(test_workspace(), "chainpay", since)
        .await
        .unwrap();

    assert_eq!(stats.total, 4);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.attempts_exhausted, 1);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}
