//! Engine assembly and lifecycle.
//!
//! Wires the scheduler, worker pool, dunning engine, and recovery service
//! together from injected capability implementations, and owns the
//! background tasks so embedding processes can stop them cleanly.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::services::dunning::DunningEngine;
use crate::services::exclusivity::ClaimRegistry;
use crate::services::executor::DelegationExecutor;
use crate::services::ledger::LedgerStore;
use crate::services::lifecycle::SubscriptionLifecycle;
use crate::services::notifier::DunningNotifier;
use crate::services::recovery::{EntitySyncer, RecoveryService, WebhookProcessor};
use crate::services::scheduler::SubscriptionScheduler;
use crate::services::worker::{job_channel, JobSender, RedemptionRunner, RedemptionWorkerPool};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// External capabilities the engine depends on.
///
/// Each component receives only the interfaces it actually calls.
pub struct EngineDependencies {
    pub store: Arc<dyn LedgerStore>,
    pub executor: Arc<dyn DelegationExecutor>,
    pub notifier: Arc<dyn DunningNotifier>,
    pub webhook_processor: Arc<dyn WebhookProcessor>,
    pub entity_syncer: Arc<dyn EntitySyncer>,
}

/// Running redemption engine.
pub struct Engine {
    lifecycle: Arc<SubscriptionLifecycle>,
    recovery: Arc<RecoveryService>,
    sender: JobSender,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Wire and start the engine: workers first, then the scheduler.
    pub async fn build(
        config: EngineConfig,
        deps: EngineDependencies,
    ) -> Result<Self, EngineError> {
        let claims = Arc::new(ClaimRegistry::new(config.claim_staleness));
        let dunning = Arc::new(DunningEngine::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.notifier),
            config.dunning.clone(),
        ));
        let runner = Arc::new(RedemptionRunner::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.executor),
            Arc::clone(&dunning),
            Arc::clone(&claims),
            config.redeem_timeout,
        ));

        let (sender, receiver) = job_channel(config.queue_capacity, config.enqueue_mode);
        let shutdown = CancellationToken::new();

        let pool = RedemptionWorkerPool::new(config.worker_count, Arc::clone(&runner));
        let mut tasks = pool.spawn(receiver, shutdown.clone());

        let scheduler = Arc::new(SubscriptionScheduler::new(
            Arc::clone(&deps.store),
            Arc::clone(&claims),
            sender.clone(),
            config.scheduler_interval,
        ));
        {
            let scheduler = Arc::clone(&scheduler);
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.run(token).await;
            }));
        }

        let lifecycle = Arc::new(SubscriptionLifecycle::new(Arc::clone(&deps.store)));
        let recovery = Arc::new(RecoveryService::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.webhook_processor),
            Arc::clone(&deps.entity_syncer),
            &config,
        ));

        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            enqueue_mode = config.enqueue_mode.as_str(),
            scheduler_interval = ?config.scheduler_interval,
            "Redemption engine started"
        );

        Ok(Self {
            lifecycle,
            recovery,
            sender,
            shutdown,
            tasks,
        })
    }

    /// Operation-facing subscription lifecycle API.
    pub fn lifecycle(&self) -> Arc<SubscriptionLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Operation-facing recovery API.
    pub fn recovery(&self) -> Arc<RecoveryService> {
        Arc::clone(&self.recovery)
    }

    /// Producer handle for out-of-band job submission.
    pub fn job_sender(&self) -> JobSender {
        self.sender.clone()
    }

    /// Stop the scheduler and workers and wait for them to finish.
    pub async fn shutdown(self) {
        info!("Redemption engine shutting down");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Engine task did not stop cleanly");
            }
        }
        info!("Redemption engine stopped");
    }
}
