//! Dunning retry engine.
//!
//! Decides whether and when a failed redemption is retried, and when the
//! subscription is handed over to cancellation. Scheduling a retry never
//! blocks a worker: the engine only writes a future timestamp that the
//! scheduler's next discovery pass picks up.

use crate::config::DunningPolicy;
use crate::error::EngineError;
use crate::models::{
    DunningAttempt, RedemptionJob, Subscription, SubscriptionEvent, SubscriptionEventType,
    SubscriptionStatus,
};
use crate::services::executor::RedeemError;
use crate::services::ledger::LedgerStore;
use crate::services::metrics;
use crate::services::notifier::DunningNotifier;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const REASON_DUNNING_EXHAUSTED: &str = "dunning_exhausted";
pub const REASON_PERMANENT_FAILURE: &str = "permanent_failure";

pub struct DunningEngine {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn DunningNotifier>,
    policy: DunningPolicy,
}

impl DunningEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn DunningNotifier>,
        policy: DunningPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// Route one classified redemption failure.
    ///
    /// Transient failures schedule a backoff retry until the attempt budget
    /// runs out; permanent failures skip retries entirely. A duplicate
    /// failure signal for an attempt number already recorded is ignored.
    #[instrument(
        skip(self, subscription, job, error),
        fields(subscription_id = %subscription.subscription_id, attempt = job.attempt)
    )]
    pub async fn record_failure(
        &self,
        subscription: &Subscription,
        job: &RedemptionJob,
        error: &RedeemError,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if error.is_permanent() {
            warn!(error = %error, "Permanent redemption failure, skipping retries");
            metrics::record_dunning_disposition("permanent");
            self.append_failure_event(subscription, error, now).await?;
            return self
                .schedule_cancellation(subscription, REASON_PERMANENT_FAILURE, now)
                .await;
        }

        let recorded = self
            .store
            .get_dunning_attempt(subscription.subscription_id)
            .await?
            .map(|a| a.attempt)
            .unwrap_or(0);

        if job.attempt < recorded {
            info!(
                recorded_attempt = recorded,
                "Duplicate failure signal for an earlier attempt, ignoring"
            );
            return Ok(());
        }

        self.append_failure_event(subscription, error, now).await?;

        let attempt = recorded + 1;
        if attempt >= self.policy.max_attempts {
            warn!(attempt, "Dunning attempts exhausted");
            metrics::record_dunning_disposition("exhausted");
            self.store
                .delete_dunning_attempt(subscription.subscription_id)
                .await?;
            self.store
                .append_event(
                    &SubscriptionEvent::new(
                        subscription.subscription_id,
                        SubscriptionEventType::DunningExhausted,
                        now,
                    )
                    .with_error(error.to_string()),
                )
                .await?;
            self.schedule_cancellation(subscription, REASON_DUNNING_EXHAUSTED, now)
                .await?;
            self.notify_exhausted(subscription.subscription_id);
            return Ok(());
        }

        let backoff = self.policy.backoff_for(attempt);
        let next_retry_at = now + chrono::Duration::milliseconds(backoff.as_millis() as i64);

        let record = match self
            .store
            .get_dunning_attempt(subscription.subscription_id)
            .await?
        {
            Some(mut existing) => {
                existing.attempt = attempt;
                existing.next_retry_at = next_retry_at;
                existing.last_failure = error.to_string();
                existing.updated_utc = now;
                existing
            }
            None => DunningAttempt::first(
                subscription.subscription_id,
                next_retry_at,
                error.to_string(),
                now,
            ),
        };
        self.store.upsert_dunning_attempt(&record).await?;

        let mut updated = subscription.clone();
        if updated.status == SubscriptionStatus::Active {
            metrics::record_transition(
                SubscriptionStatus::Active.as_str(),
                SubscriptionStatus::PastDue.as_str(),
            );
            updated.status = SubscriptionStatus::PastDue;
        }
        updated.next_redemption_date = Some(next_retry_at);
        updated.updated_utc = now;
        self.store.update_subscription(&updated).await?;

        metrics::record_dunning_disposition("retry");
        info!(
            attempt,
            next_retry_at = %next_retry_at,
            "Redemption retry scheduled"
        );
        Ok(())
    }

    async fn append_failure_event(
        &self,
        subscription: &Subscription,
        error: &RedeemError,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.store
            .append_event(
                &SubscriptionEvent::new(
                    subscription.subscription_id,
                    SubscriptionEventType::RedemptionFailed,
                    now,
                )
                .with_amount(subscription.amount_in_cents)
                .with_error(error.to_string()),
            )
            .await
    }

    /// Move a subscription to `cancellation_scheduled`; the boundary pass
    /// finalizes the cancellation at period end.
    async fn schedule_cancellation(
        &self,
        subscription: &Subscription,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut updated = subscription.clone();
        metrics::record_transition(
            updated.status.as_str(),
            SubscriptionStatus::CancellationScheduled.as_str(),
        );
        updated.status = SubscriptionStatus::CancellationScheduled;
        updated.cancellation_reason = Some(reason.to_string());
        updated.next_redemption_date = None;
        updated.updated_utc = now;
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(
                &SubscriptionEvent::new(
                    subscription.subscription_id,
                    SubscriptionEventType::CancellationScheduled,
                    now,
                )
                .with_metadata(serde_json::json!({ "reason": reason })),
            )
            .await?;

        info!(reason, "Cancellation scheduled");
        Ok(())
    }

    /// Best-effort notification; failures are logged and never propagate
    /// into the dunning transition.
    fn notify_exhausted(&self, subscription_id: uuid::Uuid) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier
                .notify_dunning_exhausted(subscription_id, REASON_DUNNING_EXHAUSTED)
                .await
            {
                warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Dunning exhausted notification failed"
                );
            }
        });
    }
}
