//! Inbound webhook events, their processing attempts, and DLQ reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing state of an inbound provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProcessingStatus {
    Pending,
    Processed,
    Failed,
    /// Delivery attempts ran out; awaiting manual replay.
    Exhausted,
}

impl WebhookProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProcessingStatus::Pending => "pending",
            WebhookProcessingStatus::Processed => "processed",
            WebhookProcessingStatus::Failed => "failed",
            WebhookProcessingStatus::Exhausted => "exhausted",
        }
    }
}

/// Inbound provider event held in the dead-letter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: Uuid,
    pub workspace_id: Uuid,
    pub provider: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub status: WebhookProcessingStatus,
    pub received_utc: DateTime<Utc>,
}

/// One processing attempt, linked to the original event.
///
/// Replay appends a new attempt rather than mutating the original event,
/// preserving the full audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookProcessingAttempt {
    pub attempt_id: Uuid,
    pub event_id: Uuid,
    pub succeeded: bool,
    pub message: String,
    /// True when the attempt was triggered by an explicit replay.
    pub replayed: bool,
    pub requested_by: Option<String>,
    pub processed_utc: DateTime<Utc>,
}

/// Request to replay a dead-lettered webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookReplayRequest {
    pub provider: String,
    pub event_id: Uuid,
    /// Reprocess even if the event already succeeded.
    #[serde(default)]
    pub force_replay: bool,
    /// Operator or system identity for the audit trail.
    pub requested_by: Option<String>,
}

/// Outcome of a webhook replay request.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReplayResponse {
    pub success: bool,
    /// Id of the processing attempt created by this replay, if any.
    pub replay_event_id: Option<Uuid>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only aggregation over webhook events for a workspace/provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqProcessingStats {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub attempts_exhausted: u64,
    /// Processed over total, 0.0 when no events are in range.
    pub success_rate: f64,
}
