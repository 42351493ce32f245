//! Ledger store contract and the in-memory reference implementation.
//!
//! The engine reads and writes durable state through this narrow interface;
//! the persistence representation behind it is the store's concern.

use crate::error::EngineError;
use crate::models::{
    DlqProcessingStats, DunningAttempt, EntityCursor, Subscription, SubscriptionEvent,
    SyncSession, WebhookEvent, WebhookProcessingAttempt, WebhookProcessingStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Durable subscription and event records consumed by the engine.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Subscriptions eligible for redemption: redeemable status and
    /// `next_redemption_date <= now`, ordered by due time.
    async fn get_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, EngineError>;

    /// Scheduled downgrades and cancellations whose period boundary has
    /// passed.
    async fn get_boundary_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, EngineError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, EngineError>;

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), EngineError>;

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), EngineError>;

    /// Append one immutable entry to the subscription's event ledger.
    async fn append_event(&self, event: &SubscriptionEvent) -> Result<(), EngineError>;

    /// Newest-first event history for a subscription.
    async fn get_subscription_events(
        &self,
        subscription_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SubscriptionEvent>, EngineError>;

    async fn get_dunning_attempt(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<DunningAttempt>, EngineError>;

    async fn upsert_dunning_attempt(&self, attempt: &DunningAttempt) -> Result<(), EngineError>;

    async fn delete_dunning_attempt(&self, subscription_id: Uuid) -> Result<(), EngineError>;

    async fn get_sync_session(&self, id: Uuid) -> Result<Option<SyncSession>, EngineError>;

    async fn insert_sync_session(&self, session: &SyncSession) -> Result<(), EngineError>;

    async fn update_sync_session(&self, session: &SyncSession) -> Result<(), EngineError>;

    /// Commit one entity type's sync progress.
    async fn update_sync_session_cursor(
        &self,
        session_id: Uuid,
        entity_type: &str,
        cursor: EntityCursor,
    ) -> Result<(), EngineError>;

    async fn get_webhook_event(&self, id: Uuid) -> Result<Option<WebhookEvent>, EngineError>;

    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<(), EngineError>;

    async fn update_webhook_event(&self, event: &WebhookEvent) -> Result<(), EngineError>;

    /// Record one processing attempt linked to the original event.
    async fn append_webhook_attempt(
        &self,
        attempt: &WebhookProcessingAttempt,
    ) -> Result<(), EngineError>;

    async fn list_webhook_attempts(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<WebhookProcessingAttempt>, EngineError>;

    /// Aggregate DLQ statistics for a workspace/provider since a timestamp.
    async fn webhook_stats(
        &self,
        workspace_id: Uuid,
        provider: &str,
        since: DateTime<Utc>,
    ) -> Result<DlqProcessingStats, EngineError>;
}

/// In-memory ledger store.
///
/// Reference implementation backing the test suite; production deployments
/// provide their own store behind [`LedgerStore`].
#[derive(Default)]
pub struct InMemoryLedgerStore {
    subscriptions: DashMap<Uuid, Subscription>,
    events: DashMap<Uuid, Vec<SubscriptionEvent>>,
    dunning: DashMap<Uuid, DunningAttempt>,
    sessions: DashMap<Uuid, SyncSession>,
    webhook_events: DashMap<Uuid, WebhookEvent>,
    webhook_attempts: DashMap<Uuid, Vec<WebhookProcessingAttempt>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, EngineError> {
        let mut due: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|entry| {
                let sub = entry.value();
                sub.status.is_redeemable()
                    && sub.next_redemption_date.is_some_and(|at| at <= now)
            })
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|s| s.next_redemption_date);
        Ok(due)
    }

    async fn get_boundary_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, EngineError> {
        use crate::models::SubscriptionStatus::{CancellationScheduled, DowngradeScheduled};
        let mut boundary: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|entry| {
                let sub = entry.value();
                matches!(sub.status, DowngradeScheduled | CancellationScheduled)
                    && sub.current_period_end <= now
            })
            .map(|entry| entry.value().clone())
            .collect();
        boundary.sort_by_key(|s| s.current_period_end);
        Ok(boundary)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, EngineError> {
        Ok(self.subscriptions.get(&id).map(|s| s.value().clone()))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), EngineError> {
        self.subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), EngineError> {
        if !self.subscriptions.contains_key(&subscription.subscription_id) {
            return Err(EngineError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                subscription.subscription_id
            )));
        }
        self.subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn append_event(&self, event: &SubscriptionEvent) -> Result<(), EngineError> {
        self.events
            .entry(event.subscription_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn get_subscription_events(
        &self,
        subscription_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SubscriptionEvent>, EngineError> {
        let mut events = self
            .events
            .get(&subscription_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        events.sort_by_key(|e| std::cmp::Reverse(e.occurred_utc));
        events.truncate(limit);
        Ok(events)
    }

    async fn get_dunning_attempt(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<DunningAttempt>, EngineError> {
        Ok(self.dunning.get(&subscription_id).map(|a| a.value().clone()))
    }

    async fn upsert_dunning_attempt(&self, attempt: &DunningAttempt) -> Result<(), EngineError> {
        self.dunning.insert(attempt.subscription_id, attempt.clone());
        Ok(())
    }

    async fn delete_dunning_attempt(&self, subscription_id: Uuid) -> Result<(), EngineError> {
        self.dunning.remove(&subscription_id);
        Ok(())
    }

    async fn get_sync_session(&self, id: Uuid) -> Result<Option<SyncSession>, EngineError> {
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn insert_sync_session(&self, session: &SyncSession) -> Result<(), EngineError> {
        self.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn update_sync_session(&self, session: &SyncSession) -> Result<(), EngineError> {
        if !self.sessions.contains_key(&session.session_id) {
            return Err(EngineError::NotFound(anyhow::anyhow!(
                "Sync session {} not found",
                session.session_id
            )));
        }
        self.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn update_sync_session_cursor(
        &self,
        session_id: Uuid,
        entity_type: &str,
        cursor: EntityCursor,
    ) -> Result<(), EngineError> {
        let mut session = self.sessions.get_mut(&session_id).ok_or_else(|| {
            EngineError::NotFound(anyhow::anyhow!("Sync session {} not found", session_id))
        })?;
        session.cursors.insert(entity_type.to_string(), cursor);
        session.updated_utc = Utc::now();
        Ok(())
    }

    async fn get_webhook_event(&self, id: Uuid) -> Result<Option<WebhookEvent>, EngineError> {
        Ok(self.webhook_events.get(&id).map(|e| e.value().clone()))
    }

    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<(), EngineError> {
        self.webhook_events.insert(event.event_id, event.clone());
        Ok(())
    }

    async fn update_webhook_event(&self, event: &WebhookEvent) -> Result<(), EngineError> {
        if !self.webhook_events.contains_key(&event.event_id) {
            return Err(EngineError::NotFound(anyhow::anyhow!(
                "Webhook event {} not found",
                event.event_id
            )));
        }
        self.webhook_events.insert(event.event_id, event.clone());
        Ok(())
    }

    async fn append_webhook_attempt(
        &self,
        attempt: &WebhookProcessingAttempt,
    ) -> Result<(), EngineError> {
        self.webhook_attempts
            .entry(attempt.event_id)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn list_webhook_attempts(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<WebhookProcessingAttempt>, EngineError> {
        Ok(self
            .webhook_attempts
            .get(&event_id)
            .map(|a| a.value().clone())
            .unwrap_or_default())
    }

    async fn webhook_stats(
        &self,
        workspace_id: Uuid,
        provider: &str,
        since: DateTime<Utc>,
    ) -> Result<DlqProcessingStats, EngineError> {
        let mut stats = DlqProcessingStats::default();
        for entry in self.webhook_events.iter() {
            let event = entry.value();
            if event.workspace_id != workspace_id
                || event.provider != provider
                || event.received_utc < since
            {
                continue;
            }
            stats.total += 1;
            match event.status {
                WebhookProcessingStatus::Processed => stats.processed += 1,
                WebhookProcessingStatus::Failed => stats.failed += 1,
                WebhookProcessingStatus::Exhausted => stats.attempts_exhausted += 1,
                WebhookProcessingStatus::Pending => {}
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.processed as f64 / stats.total as f64;
        }
        Ok(stats)
    }
}
