//! Retry and readiness policies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between fetch attempts grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// `initial + increment * (n - 1)`.
    Linear {
        #[serde(default = "default_increment_secs")]
        increment_secs: u64,
    },
    /// `initial * factor^(n - 1)`.
    Exponential {
        #[serde(default = "default_factor")]
        factor: u32,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Linear {
            increment_secs: default_increment_secs(),
        }
    }
}

fn default_increment_secs() -> u64 {
    5
}

fn default_factor() -> u32 {
    2
}

/// Bounded retry policy for the fetch/verify loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total fetch attempts, including the first (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt in seconds (default: 10).
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Growth of the delay across attempts (default: linear, +5s).
    #[serde(default)]
    pub backoff: Backoff,
    /// Upper bound on any single delay in seconds.
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_secs() -> u64 {
    10
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            backoff: Backoff::default(),
            max_delay_secs: None,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based), in seconds.
    pub fn delay_secs_for(&self, attempt: u32) -> u64 {
        let steps = attempt.saturating_sub(1);
        let secs = match self.backoff {
            Backoff::Linear { increment_secs } => self
                .initial_delay_secs
                .saturating_add(increment_secs.saturating_mul(u64::from(steps))),
            Backoff::Exponential { factor } => {
                let multiplier = u64::from(factor).saturating_pow(steps);
                self.initial_delay_secs.saturating_mul(multiplier)
            }
        };
        match self.max_delay_secs {
            Some(cap) => secs.min(cap),
            None => secs,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.delay_secs_for(attempt))
    }

    /// Validate policy invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if let Backoff::Exponential { factor } = self.backoff
            && factor == 0
        {
            return Err("retry.backoff.factor must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Fixed-interval polling policy for the dependent service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Maximum readiness checks (default: 30).
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: u32,
    /// Seconds between checks (default: 10).
    #[serde(default = "default_readiness_interval_secs")]
    pub interval_secs: u64,
    /// Per-check connect timeout in seconds (default: 5).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_readiness_interval_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_readiness_attempts(),
            interval_secs: default_readiness_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ReadinessPolicy {
    /// Interval between checks.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Timeout for a single check.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate policy invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("readiness.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}
