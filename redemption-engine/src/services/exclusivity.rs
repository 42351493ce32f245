//! Per-subscription redemption claims.
//!
//! The claim registry is the only mutable state shared between the
//! scheduler and the workers. A claim is taken before a job is enqueued and
//! released once the outcome is durably recorded, which serializes
//! redemption attempts per subscription. Claims older than the staleness
//! window are treated as abandoned so a crash between acquire and release
//! cannot strand a subscription.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct ClaimRegistry {
    claims: DashMap<Uuid, Instant>,
    staleness: Duration,
}

impl ClaimRegistry {
    pub fn new(staleness: Duration) -> Self {
        Self {
            claims: DashMap::new(),
            staleness,
        }
    }

    /// Try to take the claim for a subscription.
    ///
    /// Returns false when a live claim is already held; a stale claim is
    /// replaced.
    pub fn try_acquire(&self, subscription_id: Uuid) -> bool {
        let now = Instant::now();
        match self.claims.entry(subscription_id) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) > self.staleness {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        "Replacing stale redemption claim"
                    );
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn release(&self, subscription_id: Uuid) {
        self.claims.remove(&subscription_id);
    }

    pub fn is_held(&self, subscription_id: Uuid) -> bool {
        self.claims
            .get(&subscription_id)
            .is_some_and(|at| at.elapsed() <= self.staleness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let registry = ClaimRegistry::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert!(registry.try_acquire(id));
        assert!(!registry.try_acquire(id));

        registry.release(id);
        assert!(registry.try_acquire(id));
    }

    #[test]
    fn stale_claim_self_heals() {
        let registry = ClaimRegistry::new(Duration::from_millis(0));
        let id = Uuid::new_v4();

        assert!(registry.try_acquire(id));
        std::thread::sleep(Duration::from_millis(5));
        // The earlier claim is past the staleness window.
        assert!(registry.try_acquire(id));
    }

    #[test]
    fn claims_are_per_subscription() {
        let registry = ClaimRegistry::new(Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(registry.try_acquire(a));
        assert!(registry.try_acquire(b));
    }
}
