//! Notification collaborator contract.

use async_trait::async_trait;
use uuid::Uuid;

/// Outbound notification capability.
///
/// Best-effort: failures are logged by the caller and never block or fail
/// the dunning transition itself.
#[async_trait]
pub trait DunningNotifier: Send + Sync {
    async fn notify_dunning_exhausted(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<(), anyhow::Error>;
}

/// Notifier that only emits a structured log line.
///
/// Useful default when no delivery channel is wired up.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl DunningNotifier for LogNotifier {
    async fn notify_dunning_exhausted(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<(), anyhow::Error> {
        tracing::warn!(
            subscription_id = %subscription_id,
            reason = reason,
            "Dunning exhausted notification"
        );
        Ok(())
    }
}
