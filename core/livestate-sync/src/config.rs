//! Engine configuration.
//!
//! Every field is optional on the wire; missing fields take the defaults of
//! [`EngineConfig::default`]. Durations are written in milliseconds except
//! `ttl`, which is in seconds.

use crate::error::{EngineError, EngineResult};
use livestate_types::Schema;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for one streaming engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Minimum spacing between two flushes.
    #[serde(with = "millis")]
    pub update_interval: Duration,
    /// Buffered envelopes that force a flush.
    pub batch_size: usize,
    /// When false every envelope is committed on arrival.
    pub throttle_updates: bool,
    /// How long a partial batch may wait before it is flushed.
    #[serde(with = "millis")]
    pub throttle_interval: Duration,
    /// Entity cap.
    pub max_entities: usize,
    /// Relation cap.
    pub max_relations: usize,
    /// Entities not refreshed for this long are pruned. `None` disables it.
    #[serde(with = "opt_secs")]
    pub ttl: Option<Duration>,
    /// Reconnect policy.
    #[serde(flatten)]
    pub reconnect: ReconnectConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            update_interval: Duration::from_millis(1000),
            batch_size: 10,
            throttle_updates: true,
            throttle_interval: Duration::from_millis(200),
            max_entities: 1000,
            max_relations: 2000,
            ttl: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults tuned for schema `S`.
    pub fn for_schema<S: Schema>(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            batch_size: S::DEFAULT_BATCH_SIZE,
            max_entities: S::DEFAULT_MAX_ENTITIES,
            max_relations: S::DEFAULT_MAX_RELATIONS,
            ttl: S::DEFAULT_TTL,
            ..Self::default()
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Config("batchSize must be at least 1".into()));
        }
        if self.reconnect.backoff == Backoff::Exponential
            && self.reconnect.max_reconnect_interval < self.reconnect.reconnect_interval
        {
            return Err(EngineError::Config(
                "maxReconnectInterval is shorter than reconnectInterval".into(),
            ));
        }
        Ok(())
    }
}

/// How the delay between reconnect attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Every attempt waits `reconnectInterval`.
    #[default]
    Fixed,
    /// The delay doubles per attempt up to `maxReconnectInterval`.
    Exponential,
}

/// Reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectConfig {
    pub auto_reconnect: bool,
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    pub backoff: Backoff,
    #[serde(with = "millis")]
    pub max_reconnect_interval: Duration,
    /// Scales every delay by a random factor in [0.5, 1.0].
    pub jitter: bool,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval: Duration::from_millis(5000),
            backoff: Backoff::Fixed,
            max_reconnect_interval: Duration::from_secs(60),
            jitter: false,
            max_reconnect_attempts: Some(10),
        }
    }
}

impl ReconnectConfig {
    /// Whether reconnect attempt number `attempt` (1-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.auto_reconnect && self.max_reconnect_attempts.is_none_or(|max| attempt <= max)
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.reconnect_interval,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                self.reconnect_interval
                    .saturating_mul(1u32 << shift)
                    .min(self.max_reconnect_interval)
            }
        };
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            base
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
