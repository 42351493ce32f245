//! Subscription scheduler.
//!
//! Runs on its own periodic timer, decoupled from the workers. Each pass
//! first crosses any period boundaries (applying scheduled downgrades and
//! finalizing scheduled cancellations), then discovers due subscriptions
//! and enqueues one redemption job per subscription, taking the
//! per-subscription claim before the job enters the queue.

use crate::error::EngineError;
use crate::models::{
    RedemptionJob, Subscription, SubscriptionEvent, SubscriptionEventType, SubscriptionStatus,
};
use crate::services::exclusivity::ClaimRegistry;
use crate::services::ledger::LedgerStore;
use crate::services::metrics;
use crate::services::worker::JobSender;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct SubscriptionScheduler {
    store: Arc<dyn LedgerStore>,
    claims: Arc<ClaimRegistry>,
    sender: JobSender,
    interval: Duration,
}

impl SubscriptionScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        claims: Arc<ClaimRegistry>,
        sender: JobSender,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            claims,
            sender,
            interval,
        }
    }

    /// Periodic discovery loop; exits when the token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "Scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Scheduler pass failed");
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// One discovery pass. Returns the number of jobs enqueued.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        self.process_boundaries(now).await?;
        self.enqueue_due(now).await
    }

    /// Apply scheduled downgrades and finalize scheduled cancellations
    /// whose period boundary has passed.
    async fn process_boundaries(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        for subscription in self.store.get_boundary_subscriptions(now).await? {
            let result = match subscription.status {
                SubscriptionStatus::DowngradeScheduled => {
                    self.apply_downgrade(subscription, now).await
                }
                SubscriptionStatus::CancellationScheduled => {
                    self.finalize_cancellation(subscription, now).await
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                error!(error = %e, "Boundary processing failed");
            }
        }
        Ok(())
    }

    async fn apply_downgrade(
        &self,
        mut subscription: Subscription,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(items) = subscription.pending_line_items.take() else {
            warn!(
                subscription_id = %subscription.subscription_id,
                "Downgrade scheduled without pending line items, reactivating as-is"
            );
            subscription.status = SubscriptionStatus::Active;
            subscription.updated_utc = now;
            return self.store.update_subscription(&subscription).await;
        };

        subscription.apply_line_items(items);
        metrics::record_transition(
            SubscriptionStatus::DowngradeScheduled.as_str(),
            SubscriptionStatus::Active.as_str(),
        );
        subscription.status = SubscriptionStatus::Active;
        subscription.updated_utc = now;
        self.store.update_subscription(&subscription).await?;

        self.store
            .append_event(
                &SubscriptionEvent::new(
                    subscription.subscription_id,
                    SubscriptionEventType::DowngradeApplied,
                    now,
                )
                .with_amount(subscription.amount_in_cents),
            )
            .await?;

        info!(
            subscription_id = %subscription.subscription_id,
            amount_in_cents = subscription.amount_in_cents,
            "Scheduled downgrade applied at period boundary"
        );
        Ok(())
    }

    async fn finalize_cancellation(
        &self,
        mut subscription: Subscription,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        metrics::record_transition(
            SubscriptionStatus::CancellationScheduled.as_str(),
            SubscriptionStatus::Cancelled.as_str(),
        );
        subscription.status = SubscriptionStatus::Cancelled;
        subscription.next_redemption_date = None;
        subscription.updated_utc = now;
        self.store.update_subscription(&subscription).await?;

        let reason = subscription
            .cancellation_reason
            .clone()
            .unwrap_or_else(|| "requested".to_string());
        self.store
            .append_event(
                &SubscriptionEvent::new(
                    subscription.subscription_id,
                    SubscriptionEventType::Cancelled,
                    now,
                )
                .with_metadata(serde_json::json!({ "reason": reason })),
            )
            .await?;

        info!(
            subscription_id = %subscription.subscription_id,
            reason = %reason,
            "Cancellation finalized at period boundary"
        );
        Ok(())
    }

    /// Discover due subscriptions and enqueue one job each.
    ///
    /// A subscription whose claim is already held is skipped this pass; it
    /// becomes eligible again once the in-flight attempt records its
    /// outcome.
    async fn enqueue_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due = self.store.get_due_subscriptions(now).await?;
        let mut enqueued = 0;

        for subscription in due {
            let id = subscription.subscription_id;
            if !self.claims.try_acquire(id) {
                debug!(subscription_id = %id, "Redemption already in flight, skipping");
                continue;
            }

            let attempt = self
                .store
                .get_dunning_attempt(id)
                .await?
                .map(|a| a.attempt)
                .unwrap_or(0);
            let job = RedemptionJob::for_subscription(&subscription, now, attempt);

            match self.sender.enqueue(job).await {
                Ok(()) => enqueued += 1,
                Err(EngineError::QueueFull) => {
                    self.claims.release(id);
                    warn!(
                        subscription_id = %id,
                        enqueued,
                        "Redemption queue full, deferring remaining discoveries to next pass"
                    );
                    break;
                }
                Err(e) => {
                    self.claims.release(id);
                    return Err(e);
                }
            }
        }

        if enqueued > 0 {
            info!(enqueued, "Redemption jobs enqueued");
        }
        Ok(enqueued)
    }
}
