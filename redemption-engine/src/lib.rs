//! Redemption & recovery engine for recurring on-chain token billing.
//!
//! The engine discovers subscriptions whose billing period has elapsed,
//! redeems the periodic token amount through a delegated wallet with
//! at-most-one attempt in flight per subscription, retries failures through
//! a dunning pipeline, and replays failed webhook events and interrupted
//! provider sync sessions idempotently.
//!
//! Persistence, on-chain execution, and notification delivery are injected
//! behind narrow capability traits; the crate ships an in-memory ledger
//! store as the reference implementation used by the test suite.

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
pub mod startup;

pub use config::EngineConfig;
pub use error::EngineError;
pub use startup::Engine;
