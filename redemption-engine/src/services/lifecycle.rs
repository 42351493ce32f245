//! Operation-facing subscription lifecycle API.
//!
//! Mediates every legal state transition: upgrades (immediate, prorated),
//! downgrades (staged to the period boundary), cancellation scheduling and
//! reactivation, pause/resume, change previews, and event history.

use crate::error::EngineError;
use crate::models::{
    advance_period, ChangePreview, ChangeType, LineItem, Subscription, SubscriptionEvent,
    SubscriptionEventType, SubscriptionStatus,
};
use crate::services::ledger::LedgerStore;
use crate::services::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct SubscriptionLifecycle {
    store: Arc<dyn LedgerStore>,
}

impl SubscriptionLifecycle {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Apply a line-item upgrade immediately, charging a prorated delta
    /// for the unused remainder of the current period.
    #[instrument(skip(self, line_items), fields(subscription_id = %id))]
    pub async fn upgrade_subscription(
        &self,
        id: Uuid,
        line_items: Vec<LineItem>,
        reason: &str,
    ) -> Result<Subscription, EngineError> {
        validate_line_items(&line_items)?;
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::Active],
            "upgrade_subscription",
        )?;

        let now = Utc::now();
        let new_amount: i64 = line_items.iter().map(|i| i.amount_in_cents).sum();
        let prorated = prorated_delta(&subscription, new_amount, now);

        let mut updated = subscription;
        updated.apply_line_items(line_items);
        updated.updated_utc = now;
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(
                &SubscriptionEvent::new(id, SubscriptionEventType::Proration, now)
                    .with_amount(prorated)
                    .with_metadata(serde_json::json!({ "reason": reason })),
            )
            .await?;
        self.store
            .append_event(
                &SubscriptionEvent::new(id, SubscriptionEventType::Upgraded, now)
                    .with_amount(updated.amount_in_cents)
                    .with_metadata(serde_json::json!({ "reason": reason })),
            )
            .await?;

        info!(
            prorated_delta_in_cents = prorated,
            amount_in_cents = updated.amount_in_cents,
            "Subscription upgraded"
        );
        Ok(updated)
    }

    /// Stage a downgrade; the new line items commit when the scheduler
    /// crosses the current period boundary.
    #[instrument(skip(self, line_items), fields(subscription_id = %id))]
    pub async fn downgrade_subscription(
        &self,
        id: Uuid,
        line_items: Vec<LineItem>,
        reason: &str,
    ) -> Result<Subscription, EngineError> {
        validate_line_items(&line_items)?;
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::Active],
            "downgrade_subscription",
        )?;

        let now = Utc::now();
        let pending_amount: i64 = line_items.iter().map(|i| i.amount_in_cents).sum();
        let mut updated = subscription;
        self.transition(&mut updated, SubscriptionStatus::DowngradeScheduled, now);
        updated.pending_line_items = Some(line_items);
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(
                &SubscriptionEvent::new(id, SubscriptionEventType::DowngradeScheduled, now)
                    .with_amount(pending_amount)
                    .with_metadata(serde_json::json!({
                        "reason": reason,
                        "effective_date": updated.current_period_end,
                    })),
            )
            .await?;

        info!(
            effective_date = %updated.current_period_end,
            "Subscription downgrade scheduled"
        );
        Ok(updated)
    }

    /// Schedule cancellation at the end of the current period.
    #[instrument(skip(self, feedback), fields(subscription_id = %id))]
    pub async fn cancel_subscription(
        &self,
        id: Uuid,
        reason: &str,
        feedback: Option<String>,
    ) -> Result<Subscription, EngineError> {
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::Active, SubscriptionStatus::PastDue],
            "cancel_subscription",
        )?;

        let now = Utc::now();
        let mut updated = subscription;
        self.transition(&mut updated, SubscriptionStatus::CancellationScheduled, now);
        updated.cancellation_reason = Some(reason.to_string());
        updated.next_redemption_date = None;
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(
                &SubscriptionEvent::new(id, SubscriptionEventType::CancellationScheduled, now)
                    .with_metadata(serde_json::json!({
                        "reason": reason,
                        "feedback": feedback,
                        "effective_date": updated.current_period_end,
                    })),
            )
            .await?;

        info!(
            reason,
            effective_date = %updated.current_period_end,
            "Subscription cancellation scheduled"
        );
        Ok(updated)
    }

    /// Pause redemptions. The subscription is excluded from discovery
    /// until it is resumed.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn pause_subscription(
        &self,
        id: Uuid,
        pause_until: Option<DateTime<Utc>>,
        reason: &str,
    ) -> Result<Subscription, EngineError> {
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::Active],
            "pause_subscription",
        )?;

        let now = Utc::now();
        let mut updated = subscription;
        self.transition(&mut updated, SubscriptionStatus::Paused, now);
        updated.next_redemption_date = None;
        updated.pause_reason = Some(reason.to_string());
        updated.pause_until = pause_until;
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(
                &SubscriptionEvent::new(id, SubscriptionEventType::Paused, now).with_metadata(
                    serde_json::json!({ "reason": reason, "pause_until": pause_until }),
                ),
            )
            .await?;

        info!(reason, "Subscription paused");
        Ok(updated)
    }

    /// Resume a paused subscription, recomputing the billing period from
    /// now.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn resume_subscription(&self, id: Uuid) -> Result<Subscription, EngineError> {
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::Paused],
            "resume_subscription",
        )?;

        let now = Utc::now();
        let mut updated = subscription;
        self.transition(&mut updated, SubscriptionStatus::Active, now);
        updated.current_period_start = now;
        updated.current_period_end =
            advance_period(now, updated.billing_interval, updated.interval_count);
        updated.next_redemption_date = Some(updated.current_period_end);
        updated.pause_reason = None;
        updated.pause_until = None;
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(&SubscriptionEvent::new(
                id,
                SubscriptionEventType::Resumed,
                now,
            ))
            .await?;

        info!(
            next_redemption = %updated.current_period_end,
            "Subscription resumed"
        );
        Ok(updated)
    }

    /// Clear a scheduled cancellation before the period boundary makes it
    /// final.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn reactivate_cancelled_subscription(
        &self,
        id: Uuid,
    ) -> Result<Subscription, EngineError> {
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::CancellationScheduled],
            "reactivate_cancelled_subscription",
        )?;

        let now = Utc::now();
        let mut updated = subscription;
        self.transition(&mut updated, SubscriptionStatus::Active, now);
        updated.cancellation_reason = None;
        updated.next_redemption_date = Some(updated.current_period_end);
        self.store.update_subscription(&updated).await?;

        self.store
            .append_event(&SubscriptionEvent::new(
                id,
                SubscriptionEventType::Reactivated,
                now,
            ))
            .await?;

        info!("Subscription reactivated");
        Ok(updated)
    }

    /// Compute the financial effect of a proposed change without mutating
    /// state.
    ///
    /// The preview is only valid for the wall-clock instant and prices it
    /// was computed against.
    #[instrument(skip(self, line_items), fields(subscription_id = %id))]
    pub async fn preview_change(
        &self,
        id: Uuid,
        change_type: ChangeType,
        line_items: Vec<LineItem>,
    ) -> Result<ChangePreview, EngineError> {
        validate_line_items(&line_items)?;
        let subscription = self.load(id).await?;
        ensure_status(
            &subscription,
            &[SubscriptionStatus::Active],
            "preview_change",
        )?;

        let now = Utc::now();
        let new_amount: i64 = line_items.iter().map(|i| i.amount_in_cents).sum();

        let preview = match change_type {
            ChangeType::Upgrade => ChangePreview {
                change_type,
                prorated_delta_in_cents: prorated_delta(&subscription, new_amount, now),
                next_invoice_in_cents: new_amount,
                effective_date: now,
            },
            ChangeType::Downgrade => ChangePreview {
                change_type,
                prorated_delta_in_cents: 0,
                next_invoice_in_cents: new_amount,
                effective_date: subscription.current_period_end,
            },
        };
        Ok(preview)
    }

    /// Newest-first event history for a subscription.
    pub async fn get_subscription_history(
        &self,
        id: Uuid,
        limit: usize,
    ) -> Result<Vec<SubscriptionEvent>, EngineError> {
        // Confirm the subscription exists so callers get NotFound rather
        // than an empty history.
        self.load(id).await?;
        self.store.get_subscription_events(id, limit).await
    }

    async fn load(&self, id: Uuid) -> Result<Subscription, EngineError> {
        self.store
            .get_subscription(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(anyhow::anyhow!("Subscription {} not found", id)))
    }

    fn transition(
        &self,
        subscription: &mut Subscription,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) {
        metrics::record_transition(subscription.status.as_str(), to.as_str());
        subscription.status = to;
        subscription.updated_utc = now;
    }
}

/// Prorated charge for switching to `new_amount` for the rest of the
/// current period: unused-time fraction times the price delta, rounded
/// down to the cent.
fn prorated_delta(subscription: &Subscription, new_amount: i64, now: DateTime<Utc>) -> i64 {
    let period_ms = (subscription.current_period_end - subscription.current_period_start)
        .num_milliseconds()
        .max(1);
    let remaining_ms = (subscription.current_period_end - now)
        .num_milliseconds()
        .clamp(0, period_ms);
    let delta = new_amount - subscription.amount_in_cents;
    ((delta as i128 * remaining_ms as i128) / period_ms as i128) as i64
}

fn ensure_status(
    subscription: &Subscription,
    allowed: &[SubscriptionStatus],
    operation: &'static str,
) -> Result<(), EngineError> {
    if allowed.contains(&subscription.status) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition {
            operation,
            current: subscription.status,
        })
    }
}

fn validate_line_items(line_items: &[LineItem]) -> Result<(), EngineError> {
    if line_items.is_empty() {
        return Err(EngineError::Validation(anyhow::anyhow!(
            "At least one line item is required"
        )));
    }
    if line_items.iter().any(|i| i.amount_in_cents < 0) {
        return Err(EngineError::Validation(anyhow::anyhow!(
            "Line item amounts must not be negative"
        )));
    }
    Ok(())
}
