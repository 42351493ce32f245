//! Services module for the redemption engine.

pub mod dunning;
pub mod exclusivity;
pub mod executor;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod notifier;
pub mod recovery;
pub mod scheduler;
pub mod worker;

pub use dunning::{DunningEngine, REASON_DUNNING_EXHAUSTED, REASON_PERMANENT_FAILURE};
pub use exclusivity::ClaimRegistry;
pub use executor::{DelegationExecutor, RedeemError};
pub use ledger::{InMemoryLedgerStore, LedgerStore};
pub use lifecycle::SubscriptionLifecycle;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{DunningNotifier, LogNotifier};
pub use recovery::{EntitySyncer, RecoveryService, WebhookProcessor};
pub use scheduler::SubscriptionScheduler;
pub use worker::{job_channel, JobSender, RedemptionRunner, RedemptionWorkerPool};
