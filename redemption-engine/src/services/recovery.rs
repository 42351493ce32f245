//! Error recovery subsystem.
//!
//! Replays failed inbound webhook events and resumes or restarts
//! interrupted provider sync sessions. Every recovery operation is an
//! explicit, auditable, single-attempt action bounded by a deadline; a
//! failed recovery surfaces to the caller instead of looping.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{
    DlqProcessingStats, EntityCursor, RecoveryMode, SyncRecoveryRequest, SyncRecoveryResponse,
    SyncSession, SyncSessionStatus, WebhookEvent, WebhookProcessingAttempt,
    WebhookProcessingStatus, WebhookReplayRequest, WebhookReplayResponse,
};
use crate::services::ledger::LedgerStore;
use crate::services::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Provider-specific webhook processing pipeline.
#[async_trait]
pub trait WebhookProcessor: Send + Sync {
    /// Process one inbound event; returns a human-readable summary.
    async fn process(&self, event: &WebhookEvent) -> Result<String, anyhow::Error>;
}

/// Provider-specific bulk sync for one entity type.
#[async_trait]
pub trait EntitySyncer: Send + Sync {
    /// Sync one entity type from the given cursor; returns the final
    /// cursor once the entity type is fully processed.
    async fn sync_entity(
        &self,
        session: &SyncSession,
        entity_type: &str,
        cursor: Option<&str>,
    ) -> Result<Option<String>, anyhow::Error>;
}

pub struct RecoveryService {
    store: Arc<dyn LedgerStore>,
    processor: Arc<dyn WebhookProcessor>,
    syncer: Arc<dyn EntitySyncer>,
    recovery_timeout: Duration,
    webhook_max_attempts: i32,
}

impl RecoveryService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        processor: Arc<dyn WebhookProcessor>,
        syncer: Arc<dyn EntitySyncer>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            processor,
            syncer,
            recovery_timeout: config.recovery_timeout,
            webhook_max_attempts: config.webhook_max_attempts,
        }
    }

    /// Re-run processing for a dead-lettered webhook event.
    ///
    /// Idempotent unless forced: an event that already succeeded returns
    /// success without reprocessing. A replay appends a new attempt record
    /// linked to the original event; prior history is never mutated.
    #[instrument(skip(self, request), fields(provider = %request.provider, event_id = %request.event_id))]
    pub async fn replay_webhook_event(
        &self,
        request: WebhookReplayRequest,
    ) -> Result<WebhookReplayResponse, EngineError> {
        let event = self
            .store
            .get_webhook_event(request.event_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(anyhow::anyhow!(
                    "Webhook event {} not found",
                    request.event_id
                ))
            })?;

        if event.provider != request.provider {
            return Err(EngineError::Validation(anyhow::anyhow!(
                "Webhook event {} belongs to provider {}, not {}",
                event.event_id,
                event.provider,
                request.provider
            )));
        }

        if !request.force_replay && event.status == WebhookProcessingStatus::Processed {
            info!("Event already processed, replay is a no-op");
            metrics::record_webhook_replay(&event.provider, "noop");
            return Ok(WebhookReplayResponse {
                success: true,
                replay_event_id: None,
                message: "Event already processed successfully, nothing to replay".to_string(),
                error: None,
            });
        }

        let outcome = match tokio::time::timeout(
            self.recovery_timeout,
            self.processor.process(&event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "webhook processing timed out after {:?}",
                self.recovery_timeout
            )),
        };

        let now = Utc::now();
        let (succeeded, message) = match &outcome {
            Ok(summary) => (true, summary.clone()),
            Err(e) => (false, e.to_string()),
        };

        let attempt = WebhookProcessingAttempt {
            attempt_id: Uuid::new_v4(),
            event_id: event.event_id,
            succeeded,
            message: message.clone(),
            replayed: true,
            requested_by: request.requested_by.clone(),
            processed_utc: now,
        };
        self.store.append_webhook_attempt(&attempt).await?;

        let mut updated = event;
        updated.attempt_count += 1;
        if succeeded {
            updated.status = WebhookProcessingStatus::Processed;
            updated.last_error = None;
        } else {
            updated.last_error = Some(message.clone());
            updated.status = if updated.attempt_count >= self.webhook_max_attempts {
                WebhookProcessingStatus::Exhausted
            } else {
                WebhookProcessingStatus::Failed
            };
        }
        self.store.update_webhook_event(&updated).await?;

        let result_label = if succeeded { "success" } else { "failure" };
        metrics::record_webhook_replay(&updated.provider, result_label);
        info!(
            attempt_id = %attempt.attempt_id,
            succeeded,
            "Webhook replay recorded"
        );

        Ok(WebhookReplayResponse {
            success: succeeded,
            replay_event_id: Some(attempt.attempt_id),
            message: if succeeded {
                format!("Replay succeeded: {}", message)
            } else {
                "Replay failed".to_string()
            },
            error: if succeeded { None } else { Some(message) },
        })
    }

    /// Resume or restart a recoverable sync session.
    ///
    /// Rejected while the session is running or when it completed without
    /// recovery; a session already completed by recovery is a no-op
    /// success.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, mode = request.mode.as_str()))]
    pub async fn recover_sync_session(
        &self,
        request: SyncRecoveryRequest,
    ) -> Result<SyncRecoveryResponse, EngineError> {
        let session = self
            .store
            .get_sync_session(request.session_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(anyhow::anyhow!(
                    "Sync session {} not found",
                    request.session_id
                ))
            })?;

        match session.status {
            SyncSessionStatus::Running => {
                return Err(EngineError::RecoveryConflict(format!(
                    "Sync session {} is already running; concurrent recovery is not allowed",
                    session.session_id
                )));
            }
            SyncSessionStatus::Completed if session.recovered => {
                info!("Session already recovered, request is a no-op");
                metrics::record_sync_recovery(request.mode.as_str(), "noop");
                return Ok(SyncRecoveryResponse {
                    success: true,
                    session_id: session.session_id,
                    progress: progress_of(&session),
                    message: "Session already recovered, no action taken".to_string(),
                    error: None,
                });
            }
            SyncSessionStatus::Completed => {
                return Err(EngineError::RecoveryConflict(format!(
                    "Sync session {} already completed",
                    session.session_id
                )));
            }
            SyncSessionStatus::Failed => {
                return Err(EngineError::Validation(anyhow::anyhow!(
                    "Sync session {} is failed, not recoverable",
                    session.session_id
                )));
            }
            SyncSessionStatus::Recoverable => {}
        }

        let mut session = session;
        if request.mode == RecoveryMode::Restart {
            session.reset_cursors();
        }
        session.status = SyncSessionStatus::Running;
        session.error_message = None;
        session.updated_utc = Utc::now();
        self.store.update_sync_session(&session).await?;

        info!(
            requested_by = request.requested_by.as_deref().unwrap_or("unknown"),
            entity_types = session.entity_types.len(),
            "Sync session recovery started"
        );

        match self.drive_session(&mut session).await {
            Ok(()) => {
                session.status = SyncSessionStatus::Completed;
                session.recovered = true;
                session.updated_utc = Utc::now();
                self.store.update_sync_session(&session).await?;
                metrics::record_sync_recovery(request.mode.as_str(), "success");
                Ok(SyncRecoveryResponse {
                    success: true,
                    session_id: session.session_id,
                    progress: progress_of(&session),
                    message: format!(
                        "Recovered {} entity types via {}",
                        session.entity_types.len(),
                        request.mode.as_str()
                    ),
                    error: None,
                })
            }
            Err(e) => {
                // Back to recoverable: a failed recovery never loops on
                // its own, the caller decides whether to try again.
                session.status = SyncSessionStatus::Recoverable;
                session.error_message = Some(e.to_string());
                session.updated_utc = Utc::now();
                self.store.update_sync_session(&session).await?;
                metrics::record_sync_recovery(request.mode.as_str(), "failure");
                warn!(error = %e, "Sync session recovery failed");
                Ok(SyncRecoveryResponse {
                    success: false,
                    session_id: session.session_id,
                    progress: progress_of(&session),
                    message: "Recovery failed; session remains recoverable".to_string(),
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Process every unfinished entity type, committing the cursor as each
    /// one completes.
    async fn drive_session(&self, session: &mut SyncSession) -> Result<(), anyhow::Error> {
        for entity_type in session.entity_types.clone() {
            let cursor_state = session
                .cursors
                .get(&entity_type)
                .cloned()
                .unwrap_or_default();
            if cursor_state.completed {
                continue;
            }

            let final_cursor = match tokio::time::timeout(
                self.recovery_timeout,
                self.syncer
                    .sync_entity(session, &entity_type, cursor_state.cursor.as_deref()),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(anyhow::anyhow!(
                        "sync of {} timed out after {:?}",
                        entity_type,
                        self.recovery_timeout
                    ));
                }
            };

            let committed = EntityCursor {
                cursor: final_cursor,
                completed: true,
            };
            self.store
                .update_sync_session_cursor(session.session_id, &entity_type, committed.clone())
                .await
                .map_err(|e| anyhow::anyhow!("failed to commit cursor: {}", e))?;
            session.cursors.insert(entity_type.clone(), committed);

            info!(entity_type = %entity_type, "Entity type sync completed");
        }
        Ok(())
    }

    /// Read-only DLQ statistics for a workspace/provider since a
    /// timestamp.
    pub async fn dlq_stats(
        &self,
        workspace_id: Uuid,
        provider: &str,
        since: DateTime<Utc>,
    ) -> Result<DlqProcessingStats, EngineError> {
        self.store.webhook_stats(workspace_id, provider, since).await
    }
}

fn progress_of(session: &SyncSession) -> HashMap<String, Option<String>> {
    session
        .cursors
        .iter()
        .map(|(entity, state)| (entity.clone(), state.cursor.clone()))
        .collect()
}
