//! Domain models for the redemption engine.

mod dunning;
mod job;
mod subscription;
mod sync;
mod webhook;

pub use dunning::DunningAttempt;
pub use job::RedemptionJob;
pub use subscription::{
    advance_period, BillingInterval, ChangePreview, ChangeType, LineItem, Subscription,
    SubscriptionEvent, SubscriptionEventType, SubscriptionStatus,
};
pub use sync::{
    EntityCursor, RecoveryMode, SyncRecoveryRequest, SyncRecoveryResponse, SyncSession,
    SyncSessionStatus,
};
pub use webhook::{
    DlqProcessingStats, WebhookEvent, WebhookProcessingAttempt, WebhookProcessingStatus,
    WebhookReplayRequest, WebhookReplayResponse,
};
