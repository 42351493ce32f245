//! Test helper module for redemption engine integration tests.
//!
//! Provides an in-memory harness with scripted collaborators so tests can
//! drive scheduler passes and worker cycles deterministically.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redemption_engine::config::{DunningPolicy, EngineConfig, EnqueueMode};
use redemption_engine::models::{
    BillingInterval, LineItem, RedemptionJob, Subscription, SubscriptionEvent,
    SubscriptionStatus, SyncSession, WebhookEvent, WebhookProcessingStatus,
};
use redemption_engine::services::{
    init_metrics, job_channel, ClaimRegistry, DelegationExecutor, DunningEngine, DunningNotifier,
    EntitySyncer, InMemoryLedgerStore, JobSender, LedgerStore, RecoveryService, RedeemError,
    RedemptionRunner, SubscriptionLifecycle, SubscriptionScheduler, WebhookProcessor,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const TEST_WORKSPACE_ID: &str = "11111111-1111-1111-1111-111111111111";

pub fn test_workspace() -> Uuid {
    Uuid::parse_str(TEST_WORKSPACE_ID).unwrap()
}

/// Scripted executor outcome.
pub enum ScriptedOutcome {
    Succeed(String),
    Fail(RedeemError),
    /// Never completes within any reasonable deadline.
    Hang,
}

/// Delegation executor with a programmable outcome queue.
///
/// Falls back to success once the script runs out.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: Mutex<u32>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    pub async fn push_transient(&self, message: &str) {
        self.push(ScriptedOutcome::Fail(RedeemError::Transient(
            message.to_string(),
        )))
        .await;
    }

    pub async fn push_permanent(&self, message: &str) {
        self.push(ScriptedOutcome::Fail(RedeemError::Permanent(
            message.to_string(),
        )))
        .await;
    }

    pub async fn call_count(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait]
impl DelegationExecutor for ScriptedExecutor {
    async fn redeem(
        &self,
        _delegation_id: Uuid,
        _token_id: Uuid,
        _amount: Decimal,
    ) -> Result<String, RedeemError> {
        *self.calls.lock().await += 1;
        let scripted = self.script.lock().await.pop_front();
        match scripted {
            None => Ok(format!("0x{}", Uuid::new_v4().simple())),
            Some(ScriptedOutcome::Succeed(hash)) => Ok(hash),
            Some(ScriptedOutcome::Fail(err)) => Err(err),
            Some(ScriptedOutcome::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Notifier that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl DunningNotifier for RecordingNotifier {
    async fn notify_dunning_exhausted(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<(), anyhow::Error> {
        self.notifications
            .lock()
            .await
            .push((subscription_id, reason.to_string()));
        Ok(())
    }
}

/// Webhook processor with scripted results, succeeding by default.
#[derive(Default)]
pub struct ScriptedWebhookProcessor {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<u32>,
}

impl ScriptedWebhookProcessor {
    pub async fn push_failure(&self, message: &str) {
        self.script.lock().await.push_back(Err(message.to_string()));
    }

    pub async fn call_count(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait]
impl WebhookProcessor for ScriptedWebhookProcessor {
    async fn process(&self, _event: &WebhookEvent) -> Result<String, anyhow::Error> {
        *self.calls.lock().await += 1;
        match self.script.lock().await.pop_front() {
            Some(Ok(message)) => Ok(message),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok("processed".to_string()),
        }
    }
}

/// Entity syncer that records calls and returns a terminal cursor.
#[derive(Default)]
pub struct RecordingEntitySyncer {
    pub calls: Mutex<Vec<(String, Option<String>)>>,
    failures: Mutex<HashMap<String, String>>,
}

impl RecordingEntitySyncer {
    pub async fn fail_entity(&self, entity_type: &str, message: &str) {
        self.failures
            .lock()
            .await
            .insert(entity_type.to_string(), message.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    pub async fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl EntitySyncer for RecordingEntitySyncer {
    async fn sync_entity(
        &self,
        _session: &SyncSession,
        entity_type: &str,
        cursor: Option<&str>,
    ) -> Result<Option<String>, anyhow::Error> {
        self.calls
            .lock()
            .await
            .push((entity_type.to_string(), cursor.map(|c| c.to_string())));
        if let Some(message) = self.failures.lock().await.get(entity_type) {
            return Err(anyhow::anyhow!(message.clone()));
        }
        Ok(Some(format!("{}-end", entity_type)))
    }
}

/// Deterministic engine harness: components wired against the in-memory
/// store, with the job queue drained manually by the test.
pub struct TestHarness {
    pub store: Arc<InMemoryLedgerStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub webhook_processor: Arc<ScriptedWebhookProcessor>,
    pub entity_syncer: Arc<RecordingEntitySyncer>,
    pub claims: Arc<ClaimRegistry>,
    pub runner: Arc<RedemptionRunner>,
    pub scheduler: Arc<SubscriptionScheduler>,
    pub lifecycle: SubscriptionLifecycle,
    pub recovery: RecoveryService,
    pub sender: JobSender,
    receiver: Mutex<mpsc::Receiver<RedemptionJob>>,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        worker_count: 2,
        queue_capacity: 16,
        enqueue_mode: EnqueueMode::FailFast,
        redeem_timeout: Duration::from_millis(200),
        recovery_timeout: Duration::from_millis(500),
        claim_staleness: Duration::from_secs(60),
        dunning: DunningPolicy::default(),
        ..EngineConfig::default()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_metrics();

        let store = Arc::new(InMemoryLedgerStore::new());
        let executor = Arc::new(ScriptedExecutor::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let webhook_processor = Arc::new(ScriptedWebhookProcessor::default());
        let entity_syncer = Arc::new(RecordingEntitySyncer::default());
        let claims = Arc::new(ClaimRegistry::new(config.claim_staleness));

        let dunning = Arc::new(DunningEngine::new(
            store.clone() as Arc<dyn LedgerStore>,
            notifier.clone() as Arc<dyn DunningNotifier>,
            config.dunning.clone(),
        ));
        let runner = Arc::new(RedemptionRunner::new(
            store.clone() as Arc<dyn LedgerStore>,
            executor.clone() as Arc<dyn DelegationExecutor>,
            dunning,
            claims.clone(),
            config.redeem_timeout,
        ));

        let (sender, receiver) = job_channel(config.queue_capacity, config.enqueue_mode);
        let scheduler = Arc::new(SubscriptionScheduler::new(
            store.clone() as Arc<dyn LedgerStore>,
            claims.clone(),
            sender.clone(),
            config.scheduler_interval,
        ));
        let lifecycle = SubscriptionLifecycle::new(store.clone() as Arc<dyn LedgerStore>);
        let recovery = RecoveryService::new(
            store.clone() as Arc<dyn LedgerStore>,
            webhook_processor.clone() as Arc<dyn WebhookProcessor>,
            entity_syncer.clone() as Arc<dyn EntitySyncer>,
            &config,
        );

        Self {
            store,
            executor,
            notifier,
            webhook_processor,
            entity_syncer,
            claims,
            runner,
            scheduler,
            lifecycle,
            recovery,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Pop the next queued job without blocking.
    pub async fn next_job(&self) -> Option<RedemptionJob> {
        self.receiver.lock().await.try_recv().ok()
    }

    /// One scheduler pass followed by worker cycles for every queued job.
    pub async fn run_one_cycle(&self, now: DateTime<Utc>) -> usize {
        let enqueued = self.scheduler.tick(now).await.expect("scheduler tick");
        while let Some(job) = self.next_job().await {
            self.runner.process(job).await.expect("job processing");
        }
        enqueued
    }

    pub async fn seed_subscription(&self, subscription: &Subscription) {
        self.store
            .insert_subscription(subscription)
            .await
            .expect("seed subscription");
    }

    pub async fn subscription(&self, id: Uuid) -> Subscription {
        self.store
            .get_subscription(id)
            .await
            .expect("get subscription")
            .expect("subscription exists")
    }

    pub async fn events(&self, id: Uuid) -> Vec<SubscriptionEvent> {
        self.store
            .get_subscription_events(id, 100)
            .await
            .expect("get events")
    }
}

/// An active monthly subscription whose redemption came due one hour ago.
pub fn due_subscription(now: DateTime<Utc>) -> Subscription {
    let period_end = now - ChronoDuration::hours(1);
    let period_start = period_end - ChronoDuration::days(30);
    subscription_with_period(period_start, period_end, Some(period_end))
}

/// An active monthly subscription that is not yet due.
pub fn future_subscription(now: DateTime<Utc>) -> Subscription {
    let period_start = now - ChronoDuration::days(15);
    let period_end = period_start + ChronoDuration::days(30);
    subscription_with_period(period_start, period_end, Some(period_end))
}

pub fn subscription_with_period(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    next_redemption: Option<DateTime<Utc>>,
) -> Subscription {
    let price_id = Uuid::new_v4();
    Subscription {
        subscription_id: Uuid::new_v4(),
        workspace_id: test_workspace(),
        customer_id: Uuid::new_v4(),
        product_id: Uuid::new_v4(),
        price_id,
        token_id: Uuid::new_v4(),
        token_amount: Decimal::from(25),
        amount_in_cents: 2500,
        delegation_id: Uuid::new_v4(),
        status: SubscriptionStatus::Active,
        billing_interval: BillingInterval::Monthly,
        interval_count: 1,
        current_period_start: period_start,
        current_period_end: period_end,
        next_redemption_date: next_redemption,
        line_items: vec![LineItem {
            price_id,
            description: "Pro plan".to_string(),
            amount_in_cents: 2500,
            token_amount: Decimal::from(25),
        }],
        pending_line_items: None,
        pause_reason: None,
        pause_until: None,
        cancellation_reason: None,
        total_redemptions: 0,
        total_amount_in_cents: 0,
        created_utc: period_start,
        updated_utc: period_start,
    }
}

pub fn line_items_totalling(amount_in_cents: i64, tokens: i64) -> Vec<LineItem> {
    vec![LineItem {
        price_id: Uuid::new_v4(),
        description: "Plan".to_string(),
        amount_in_cents,
        token_amount: Decimal::from(tokens),
    }]
}

/// A dead-lettered webhook event in the given state.
pub fn webhook_event(status: WebhookProcessingStatus, attempt_count: i32) -> WebhookEvent {
    WebhookEvent {
        event_id: Uuid::new_v4(),
        workspace_id: test_workspace(),
        provider: "chainpay".to_string(),
        event_type: "payment.settled".to_string(),
        payload: serde_json::json!({ "id": Uuid::new_v4() }),
        attempt_count,
        last_error: None,
        status,
        received_utc: Utc::now(),
    }
}
