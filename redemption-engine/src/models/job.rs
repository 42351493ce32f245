//! Ephemeral redemption work unit.

use crate::models::Subscription;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One unit of redemption work: a single subscription period.
///
/// Lives only in the job queue; the durable outcome is the
/// `SubscriptionEvent` it produces.
#[derive(Debug, Clone)]
pub struct RedemptionJob {
    pub job_id: Uuid,
    pub subscription_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    /// Dunning attempt count at enqueue time (0 for a first try).
    pub attempt: u32,
    /// Period start captured at enqueue, used to suppress duplicate
    /// period advances.
    pub period_start: DateTime<Utc>,
}

impl RedemptionJob {
    pub fn for_subscription(
        subscription: &Subscription,
        scheduled_at: DateTime<Utc>,
        attempt: u32,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            subscription_id: subscription.subscription_id,
            scheduled_at,
            attempt,
            period_start: subscription.current_period_start,
        }
    }
}
