//! Subscription model and its append-only event ledger.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription status.
///
/// Transitions are mediated exclusively by the scheduler, the lifecycle
/// operations, and the dunning engine; `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Paused,
    DowngradeScheduled,
    CancellationScheduled,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::DowngradeScheduled => "downgrade_scheduled",
            SubscriptionStatus::CancellationScheduled => "cancellation_scheduled",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "past_due" => SubscriptionStatus::PastDue,
            "paused" => SubscriptionStatus::Paused,
            "downgrade_scheduled" => SubscriptionStatus::DowngradeScheduled,
            "cancellation_scheduled" => SubscriptionStatus::CancellationScheduled,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Active,
        }
    }

    /// Whether the subscription is eligible for redemption discovery.
    pub fn is_redeemable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing interval for a subscription period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Daily => "daily",
            BillingInterval::Weekly => "weekly",
            BillingInterval::Monthly => "monthly",
            BillingInterval::Quarterly => "quarterly",
            BillingInterval::Annually => "annually",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "daily" => BillingInterval::Daily,
            "weekly" => BillingInterval::Weekly,
            "quarterly" => BillingInterval::Quarterly,
            "annually" => BillingInterval::Annually,
            _ => BillingInterval::Monthly,
        }
    }
}

/// Advance a period boundary by one billing interval.
pub fn advance_period(
    start: DateTime<Utc>,
    interval: BillingInterval,
    count: i32,
) -> DateTime<Utc> {
    match interval {
        BillingInterval::Daily => start + chrono::Duration::days(count as i64),
        BillingInterval::Weekly => start + chrono::Duration::weeks(count as i64),
        BillingInterval::Monthly => start + Months::new(count as u32),
        BillingInterval::Quarterly => start + Months::new((count * 3) as u32),
        BillingInterval::Annually => start + Months::new((count * 12) as u32),
    }
}

/// One priced line of a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub price_id: Uuid,
    pub description: String,
    /// Fiat value of this line per billing period.
    pub amount_in_cents: i64,
    /// Tokens redeemed for this line per billing period.
    pub token_amount: Decimal,
}

/// Subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub workspace_id: Uuid,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub price_id: Uuid,
    pub token_id: Uuid,
    /// Tokens redeemed per billing period (sum of line items).
    pub token_amount: Decimal,
    /// Fiat value of one billing period in cents (sum of line items).
    pub amount_in_cents: i64,
    /// On-chain delegation used to redeem on the customer's behalf.
    pub delegation_id: Uuid,
    pub status: SubscriptionStatus,
    pub billing_interval: BillingInterval,
    pub interval_count: i32,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// None while paused or once no further redemption is expected.
    pub next_redemption_date: Option<DateTime<Utc>>,
    pub line_items: Vec<LineItem>,
    /// Downgrade staged until the current period boundary is crossed.
    pub pending_line_items: Option<Vec<LineItem>>,
    pub pause_reason: Option<String>,
    pub pause_until: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub total_redemptions: i64,
    pub total_amount_in_cents: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    /// Advance the billing period by one interval after a successful
    /// redemption and line up the next one at the new period boundary.
    pub fn advance_billing_period(&mut self, now: DateTime<Utc>) {
        let new_start = self.current_period_end;
        let new_end = advance_period(new_start, self.billing_interval, self.interval_count);
        self.current_period_start = new_start;
        self.current_period_end = new_end;
        self.next_redemption_date = Some(new_end);
        self.updated_utc = now;
    }

    /// Replace the priced lines and recompute the per-period totals.
    pub fn apply_line_items(&mut self, items: Vec<LineItem>) {
        self.amount_in_cents = items.iter().map(|i| i.amount_in_cents).sum();
        self.token_amount = items.iter().map(|i| i.token_amount).sum();
        self.line_items = items;
    }
}

/// Lifecycle and redemption event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    Redeemed,
    RedemptionFailed,
    Proration,
    Upgraded,
    DowngradeScheduled,
    DowngradeApplied,
    CancellationScheduled,
    Cancelled,
    Reactivated,
    Paused,
    Resumed,
    DunningExhausted,
}

impl SubscriptionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEventType::Redeemed => "redeemed",
            SubscriptionEventType::RedemptionFailed => "redemption_failed",
            SubscriptionEventType::Proration => "proration",
            SubscriptionEventType::Upgraded => "upgraded",
            SubscriptionEventType::DowngradeScheduled => "downgrade_scheduled",
            SubscriptionEventType::DowngradeApplied => "downgrade_applied",
            SubscriptionEventType::CancellationScheduled => "cancellation_scheduled",
            SubscriptionEventType::Cancelled => "cancelled",
            SubscriptionEventType::Reactivated => "reactivated",
            SubscriptionEventType::Paused => "paused",
            SubscriptionEventType::Resumed => "resumed",
            SubscriptionEventType::DunningExhausted => "dunning_exhausted",
        }
    }
}

/// Append-only ledger entry recording one lifecycle or redemption fact.
///
/// Events are never updated or deleted; they form the audit trail and the
/// input to dunning decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: SubscriptionEventType,
    pub transaction_hash: Option<String>,
    pub amount_in_cents: i64,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_utc: DateTime<Utc>,
}

impl SubscriptionEvent {
    pub fn new(
        subscription_id: Uuid,
        event_type: SubscriptionEventType,
        occurred_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            subscription_id,
            event_type,
            transaction_hash: None,
            amount_in_cents: 0,
            error_message: None,
            metadata: None,
            occurred_utc,
        }
    }

    pub fn with_amount(mut self, amount_in_cents: i64) -> Self {
        self.amount_in_cents = amount_in_cents;
        self
    }

    pub fn with_transaction_hash(mut self, hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(hash.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Kind of line-item change applied to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upgrade,
    Downgrade,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Upgrade => "upgrade",
            ChangeType::Downgrade => "downgrade",
        }
    }
}

/// Financial effect of a proposed line-item change.
///
/// Computed without mutating state; not valid once wall-clock time or
/// prices move.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePreview {
    pub change_type: ChangeType,
    /// Prorated charge (positive) or credit for the remaining period.
    pub prorated_delta_in_cents: i64,
    /// Estimated amount of the next full invoice.
    pub next_invoice_in_cents: i64,
    pub effective_date: DateTime<Utc>,
}
