//! Delegation executor contract.
//!
//! The executor performs the actual on-chain token transfer on behalf of a
//! customer's delegated wallet. Failures are typed so the dunning engine
//! can decide between backoff and immediate escalation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Typed redemption failure.
#[derive(Debug, Clone, Error)]
pub enum RedeemError {
    /// Network trouble, gas spikes, timeouts; worth retrying later.
    #[error("transient redemption failure: {0}")]
    Transient(String),

    /// Revoked delegation, insufficient balance, invalid token; retrying
    /// cannot succeed.
    #[error("permanent redemption failure: {0}")]
    Permanent(String),
}

impl RedeemError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, RedeemError::Permanent(_))
    }
}

/// On-chain token transfer capability.
#[async_trait]
pub trait DelegationExecutor: Send + Sync {
    /// Transfer `amount` of `token_id` under the given delegation.
    ///
    /// Returns the transaction hash on success.
    async fn redeem(
        &self,
        delegation_id: Uuid,
        token_id: Uuid,
        amount: Decimal,
    ) -> Result<String, RedeemError>;
}
