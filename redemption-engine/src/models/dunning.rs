//! Dunning retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-subscription retry state.
///
/// Created on the first redemption failure, updated on each retry, and
/// deleted on success or when the escalation threshold is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DunningAttempt {
    pub subscription_id: Uuid,
    /// Number of consecutive transient failures recorded so far.
    pub attempt: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_failure: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl DunningAttempt {
    pub fn first(
        subscription_id: Uuid,
        next_retry_at: DateTime<Utc>,
        last_failure: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subscription_id,
            attempt: 1,
            next_retry_at,
            last_failure,
            created_utc: now,
            updated_utc: now,
        }
    }
}
