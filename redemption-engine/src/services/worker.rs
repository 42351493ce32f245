//! Redemption worker pool.
//!
//! A fixed-size pool of workers drains a bounded job queue. The queue is
//! the system's backpressure mechanism: when it is full the producer either
//! waits or receives a retryable signal, it never grows unboundedly.

use crate::config::EnqueueMode;
use crate::error::EngineError;
use crate::models::{RedemptionJob, SubscriptionEvent, SubscriptionEventType, SubscriptionStatus};
use crate::services::dunning::DunningEngine;
use crate::services::exclusivity::ClaimRegistry;
use crate::services::executor::{DelegationExecutor, RedeemError};
use crate::services::ledger::LedgerStore;
use crate::services::metrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Create the bounded job queue.
pub fn job_channel(
    capacity: usize,
    mode: EnqueueMode,
) -> (JobSender, mpsc::Receiver<RedemptionJob>) {
    let (tx, rx) = mpsc::channel(capacity);
    (JobSender { tx, mode }, rx)
}

/// Producer handle onto the bounded job queue.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::Sender<RedemptionJob>,
    mode: EnqueueMode,
}

impl JobSender {
    /// Hand a job to the pool.
    ///
    /// With [`EnqueueMode::Block`] this waits for queue capacity; with
    /// [`EnqueueMode::FailFast`] a full queue yields
    /// [`EngineError::QueueFull`].
    pub async fn enqueue(&self, job: RedemptionJob) -> Result<(), EngineError> {
        match self.mode {
            EnqueueMode::Block => self
                .tx
                .send(job)
                .await
                .map_err(|_| EngineError::Internal(anyhow::anyhow!("redemption queue closed")))?,
            EnqueueMode::FailFast => self.tx.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => EngineError::QueueFull,
                TrySendError::Closed(_) => {
                    EngineError::Internal(anyhow::anyhow!("redemption queue closed"))
                }
            })?,
        }
        metrics::set_queue_depth((self.tx.max_capacity() - self.tx.capacity()) as i64);
        Ok(())
    }
}

/// Executes one redemption job end to end.
///
/// Shared by every worker in the pool; also usable directly by tests that
/// drive jobs without the queue.
pub struct RedemptionRunner {
    store: Arc<dyn LedgerStore>,
    executor: Arc<dyn DelegationExecutor>,
    dunning: Arc<DunningEngine>,
    claims: Arc<ClaimRegistry>,
    redeem_timeout: Duration,
    completed_jobs: DashMap<Uuid, ()>,
}

impl RedemptionRunner {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        executor: Arc<dyn DelegationExecutor>,
        dunning: Arc<DunningEngine>,
        claims: Arc<ClaimRegistry>,
        redeem_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            dunning,
            claims,
            redeem_timeout,
            completed_jobs: DashMap::new(),
        }
    }

    /// Run one job and release the subscription's claim once the outcome
    /// has been recorded.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, subscription_id = %job.subscription_id))]
    pub async fn process(&self, job: RedemptionJob) -> Result<(), EngineError> {
        let result = self.execute(&job).await;
        self.claims.release(job.subscription_id);
        result
    }

    async fn execute(&self, job: &RedemptionJob) -> Result<(), EngineError> {
        let Some(subscription) = self.store.get_subscription(job.subscription_id).await? else {
            warn!("Subscription vanished before redemption, dropping job");
            return Ok(());
        };

        if !subscription.status.is_redeemable() || subscription.next_redemption_date.is_none() {
            debug!(status = %subscription.status, "Subscription no longer redeemable, dropping job");
            return Ok(());
        }

        let started = std::time::Instant::now();
        let outcome = match tokio::time::timeout(
            self.redeem_timeout,
            self.executor.redeem(
                subscription.delegation_id,
                subscription.token_id,
                subscription.token_amount,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RedeemError::Transient(format!(
                "redemption timed out after {:?}",
                self.redeem_timeout
            ))),
        };

        let now = Utc::now();
        let workspace = subscription.workspace_id.to_string();
        match outcome {
            Ok(transaction_hash) => {
                observe_duration("success", started);
                metrics::record_redemption(&workspace, "success");
                self.record_success(job, now, transaction_hash).await
            }
            Err(err) => {
                let label = if err.is_permanent() { "permanent" } else { "transient" };
                observe_duration(label, started);
                metrics::record_redemption(&workspace, label);
                self.dunning
                    .record_failure(&subscription, job, &err, now)
                    .await
            }
        }
    }

    /// Record a successful redemption outcome.
    ///
    /// Idempotent on the job id, and refuses to advance a period the job
    /// did not capture, so a duplicate signal can never double-advance.
    pub async fn record_success(
        &self,
        job: &RedemptionJob,
        now: DateTime<Utc>,
        transaction_hash: String,
    ) -> Result<(), EngineError> {
        if self.completed_jobs.insert(job.job_id, ()).is_some() {
            warn!(job_id = %job.job_id, "Duplicate redemption outcome, ignoring");
            return Ok(());
        }

        let Some(subscription) = self.store.get_subscription(job.subscription_id).await? else {
            warn!("Subscription vanished before outcome recording");
            return Ok(());
        };

        if subscription.current_period_start != job.period_start {
            warn!(
                job_period_start = %job.period_start,
                current_period_start = %subscription.current_period_start,
                "Billing period already advanced past this job, ignoring outcome"
            );
            return Ok(());
        }

        self.store
            .append_event(
                &SubscriptionEvent::new(
                    subscription.subscription_id,
                    SubscriptionEventType::Redeemed,
                    now,
                )
                .with_amount(subscription.amount_in_cents)
                .with_transaction_hash(transaction_hash.clone()),
            )
            .await?;

        let mut updated = subscription;
        updated.total_redemptions += 1;
        updated.total_amount_in_cents += updated.amount_in_cents;
        updated.advance_billing_period(now);
        if updated.status == SubscriptionStatus::PastDue {
            metrics::record_transition(
                SubscriptionStatus::PastDue.as_str(),
                SubscriptionStatus::Active.as_str(),
            );
            updated.status = SubscriptionStatus::Active;
        }
        self.store.update_subscription(&updated).await?;
        self.store
            .delete_dunning_attempt(updated.subscription_id)
            .await?;

        info!(
            transaction_hash = %transaction_hash,
            total_redemptions = updated.total_redemptions,
            next_redemption = ?updated.next_redemption_date,
            "Redemption recorded"
        );
        Ok(())
    }

    /// Contain a panicked job: route it to dunning as a transient failure
    /// and free the claim so the subscription is not stranded.
    async fn contain_panic(&self, job: RedemptionJob) {
        error!(
            job_id = %job.job_id,
            subscription_id = %job.subscription_id,
            "Redemption job panicked, containing"
        );
        match self.store.get_subscription(job.subscription_id).await {
            Ok(Some(subscription)) => {
                let err = RedeemError::Transient("redemption job panicked".to_string());
                if let Err(e) = self
                    .dunning
                    .record_failure(&subscription, &job, &err, Utc::now())
                    .await
                {
                    error!(error = %e, "Failed to record panicked job as transient failure");
                }
            }
            Ok(None) => warn!("Subscription vanished while containing panicked job"),
            Err(e) => error!(error = %e, "Failed to load subscription for panicked job"),
        }
        self.claims.release(job.subscription_id);
    }
}

fn observe_duration(outcome: &str, started: std::time::Instant) {
    metrics::REDEMPTION_DURATION
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
}

/// Fixed-size pool of redemption workers draining the bounded job queue.
pub struct RedemptionWorkerPool {
    worker_count: usize,
    runner: Arc<RedemptionRunner>,
}

impl RedemptionWorkerPool {
    pub fn new(worker_count: usize, runner: Arc<RedemptionRunner>) -> Self {
        Self {
            worker_count: worker_count.max(1),
            runner,
        }
    }

    /// Start the workers. They drain the queue until the token is
    /// cancelled or the queue closes.
    pub fn spawn(
        &self,
        receiver: mpsc::Receiver<RedemptionJob>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        (0..self.worker_count)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let runner = Arc::clone(&self.runner);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(worker, "Redemption worker started");
                    loop {
                        let job = {
                            let mut rx = receiver.lock().await;
                            tokio::select! {
                                _ = shutdown.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job) = job else { break };

                        // Run the job body in its own task so a panic is
                        // contained to the job, not the worker.
                        let job_for_containment = job.clone();
                        let task_runner = Arc::clone(&runner);
                        let handle =
                            tokio::spawn(async move { task_runner.process(job).await });
                        match handle.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                error!(worker, error = %e, "Redemption job failed")
                            }
                            Err(join_err) if join_err.is_panic() => {
                                runner.contain_panic(job_for_containment).await;
                            }
                            Err(join_err) => {
                                error!(worker, error = %join_err, "Redemption job aborted")
                            }
                        }
                    }
                    info!(worker, "Redemption worker stopped");
                })
            })
            .collect()
    }
}
