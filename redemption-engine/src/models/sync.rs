//! Provider sync session models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sync session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSessionStatus {
    Running,
    Completed,
    Failed,
    Recoverable,
}

impl SyncSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSessionStatus::Running => "running",
            SyncSessionStatus::Completed => "completed",
            SyncSessionStatus::Failed => "failed",
            SyncSessionStatus::Recoverable => "recoverable",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => SyncSessionStatus::Completed,
            "failed" => SyncSessionStatus::Failed,
            "recoverable" => SyncSessionStatus::Recoverable,
            _ => SyncSessionStatus::Running,
        }
    }
}

/// How a recoverable session should be brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Continue each entity type from its last committed cursor.
    Resume,
    /// Reset cursors and re-process every entity type in scope.
    Restart,
}

impl Default for RecoveryMode {
    fn default() -> Self {
        RecoveryMode::Resume
    }
}

impl RecoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMode::Resume => "resume",
            RecoveryMode::Restart => "restart",
        }
    }
}

/// Per-entity-type sync progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityCursor {
    pub cursor: Option<String>,
    pub completed: bool,
}

/// One batch synchronization run against an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub session_id: Uuid,
    pub workspace_id: Uuid,
    pub provider: String,
    pub entity_types: Vec<String>,
    pub status: SyncSessionStatus,
    pub cursors: HashMap<String, EntityCursor>,
    /// Set once a recovery request completed this session; makes recovery
    /// idempotent.
    pub recovered: bool,
    pub error_message: Option<String>,
    pub started_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl SyncSession {
    pub fn new(
        workspace_id: Uuid,
        provider: impl Into<String>,
        entity_types: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let cursors = entity_types
            .iter()
            .map(|e| (e.clone(), EntityCursor::default()))
            .collect();
        Self {
            session_id: Uuid::new_v4(),
            workspace_id,
            provider: provider.into(),
            entity_types,
            status: SyncSessionStatus::Running,
            cursors,
            recovered: false,
            error_message: None,
            started_utc: now,
            updated_utc: now,
        }
    }

    /// Reset all cursors to the session start.
    pub fn reset_cursors(&mut self) {
        for cursor in self.cursors.values_mut() {
            *cursor = EntityCursor::default();
        }
    }
}

/// Request to recover an interrupted sync session.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRecoveryRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub mode: RecoveryMode,
    /// Operator or system identity for the audit trail.
    pub requested_by: Option<String>,
}

/// Outcome of a sync recovery request.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRecoveryResponse {
    pub success: bool,
    pub session_id: Uuid,
    /// Last committed cursor per entity type.
    pub progress: HashMap<String, Option<String>>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
