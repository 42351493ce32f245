//! Configuration module for the redemption engine.

use crate::error::EngineError;
use std::env;
use std::time::Duration;

/// Behavior of the scheduler when the redemption job queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueMode {
    /// Block the producer until queue capacity frees up.
    Block,
    /// Fail immediately with a retryable signal.
    FailFast,
}

impl EnqueueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueMode::Block => "block",
            EnqueueMode::FailFast => "fail_fast",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "fail_fast" => EnqueueMode::FailFast,
            _ => EnqueueMode::Block,
        }
    }
}

/// Backoff and escalation parameters for the dunning pipeline.
#[derive(Debug, Clone)]
pub struct DunningPolicy {
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Multiplier applied per additional attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
    /// Total transient failures tolerated before cancellation is scheduled.
    pub max_attempts: u32,
}

impl Default for DunningPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(3600),
            backoff_multiplier: 6.0,
            max_backoff: Duration::from_secs(24 * 3600),
            max_attempts: 4,
        }
    }
}

impl DunningPolicy {
    /// Backoff before retrying after the given failure count (1-based).
    ///
    /// Monotone non-decreasing in the attempt number, capped at
    /// `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let backoff = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(exp as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub service_name: String,
    pub log_level: String,
    /// Number of redemption workers.
    pub worker_count: usize,
    /// Capacity of the bounded job queue.
    pub queue_capacity: usize,
    /// Producer behavior when the queue is full.
    pub enqueue_mode: EnqueueMode,
    /// Interval between scheduler discovery passes.
    pub scheduler_interval: Duration,
    /// Deadline for a single delegation executor call.
    pub redeem_timeout: Duration,
    /// Deadline for a single recovery operation (replay or sync).
    pub recovery_timeout: Duration,
    /// Age after which an unreleased redemption claim self-heals.
    pub claim_staleness: Duration,
    /// Delivery attempts after which a webhook event is parked as exhausted.
    pub webhook_max_attempts: i32,
    pub dunning: DunningPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "redemption-engine".to_string(),
            log_level: "info".to_string(),
            worker_count: 4,
            queue_capacity: 64,
            enqueue_mode: EnqueueMode::Block,
            scheduler_interval: Duration::from_secs(60),
            redeem_timeout: Duration::from_secs(30),
            recovery_timeout: Duration::from_secs(60),
            claim_staleness: Duration::from_secs(10 * 60),
            webhook_max_attempts: 5,
            dunning: DunningPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        let defaults = EngineConfig::default();

        Ok(Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "redemption-engine".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            worker_count: parse_env("REDEMPTION_WORKER_COUNT", defaults.worker_count)?,
            queue_capacity: parse_env("REDEMPTION_QUEUE_CAPACITY", defaults.queue_capacity)?,
            enqueue_mode: env::var("REDEMPTION_ENQUEUE_MODE")
                .map(|s| EnqueueMode::from_string(&s))
                .unwrap_or(defaults.enqueue_mode),
            scheduler_interval: Duration::from_secs(parse_env(
                "SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval.as_secs(),
            )?),
            redeem_timeout: Duration::from_secs(parse_env(
                "REDEEM_TIMEOUT_SECS",
                defaults.redeem_timeout.as_secs(),
            )?),
            recovery_timeout: Duration::from_secs(parse_env(
                "RECOVERY_TIMEOUT_SECS",
                defaults.recovery_timeout.as_secs(),
            )?),
            claim_staleness: Duration::from_secs(parse_env(
                "CLAIM_STALENESS_SECS",
                defaults.claim_staleness.as_secs(),
            )?),
            webhook_max_attempts: parse_env(
                "WEBHOOK_MAX_ATTEMPTS",
                defaults.webhook_max_attempts,
            )?,
            dunning: DunningPolicy {
                initial_backoff: Duration::from_secs(parse_env(
                    "DUNNING_INITIAL_BACKOFF_SECS",
                    defaults.dunning.initial_backoff.as_secs(),
                )?),
                backoff_multiplier: parse_env(
                    "DUNNING_BACKOFF_MULTIPLIER",
                    defaults.dunning.backoff_multiplier,
                )?,
                max_backoff: Duration::from_secs(parse_env(
                    "DUNNING_MAX_BACKOFF_SECS",
                    defaults.dunning.max_backoff.as_secs(),
                )?),
                max_attempts: parse_env("DUNNING_MAX_ATTEMPTS", defaults.dunning.max_attempts)?,
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, EngineError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            EngineError::Config(anyhow::anyhow!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
