//! Coordinator configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// A `HERALD_*` variable held a value that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct ConfigError {
    /// Variable name.
    pub key: &'static str,
    /// Raw value.
    pub value: String,
    /// What was wrong with it.
    pub reason: String,
}

/// Runtime settings for the bus and coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Transport identity of this process. Envelopes carrying it are not
    /// consumed back.
    pub node_id: String,
    /// Upper bound on one handler invocation.
    pub handler_timeout: Duration,
    /// Retry budget for retryable handler outcomes and timeouts.
    pub handler_retry: RetryPolicy,
    /// Retry budget for transport publishes.
    pub transport_retry: RetryPolicy,
    /// Retry budget for store appends.
    pub store_retry: RetryPolicy,
    /// How long shutdown waits for in-flight dispatches.
    pub drain_timeout: Duration,
    /// Page size when reading events for replay.
    pub replay_batch_size: usize,
    /// Dispatch envelopes broadcast by other nodes to local handlers.
    pub consume_remote: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            handler_timeout: Duration::from_secs(5),
            handler_retry: RetryPolicy::default(),
            transport_retry: RetryPolicy::default(),
            store_retry: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(10),
            replay_batch_size: 500,
            consume_remote: false,
        }
    }
}

impl CoordinatorConfig {
    /// Reads overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `HERALD_*` variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`, starting from the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(node_id) = lookup("HERALD_NODE_ID").filter(|v| !v.trim().is_empty()) {
            config.node_id = node_id;
        }
        if let Some(ms) = parse::<u64>(&lookup, "HERALD_HANDLER_TIMEOUT_MS")? {
            config.handler_timeout = Duration::from_millis(positive("HERALD_HANDLER_TIMEOUT_MS", ms)?);
        }
        if let Some(attempts) = parse::<u32>(&lookup, "HERALD_HANDLER_MAX_ATTEMPTS")? {
            config.handler_retry.max_attempts =
                u32::try_from(positive("HERALD_HANDLER_MAX_ATTEMPTS", u64::from(attempts))?)
                    .unwrap_or(u32::MAX);
        }

        let initial = parse::<u64>(&lookup, "HERALD_RETRY_INITIAL_BACKOFF_MS")?;
        let max = parse::<u64>(&lookup, "HERALD_RETRY_MAX_BACKOFF_MS")?;
        for policy in [
            &mut config.handler_retry,
            &mut config.transport_retry,
            &mut config.store_retry,
        ] {
            let initial = initial.map_or(policy.initial_backoff, Duration::from_millis);
            let max = max.map_or(policy.max_backoff, Duration::from_millis);
            *policy = policy.with_backoff(initial, max);
        }

        if let Some(ms) = parse::<u64>(&lookup, "HERALD_DRAIN_TIMEOUT_MS")? {
            config.drain_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = parse::<u64>(&lookup, "HERALD_REPLAY_BATCH_SIZE")? {
            config.replay_batch_size =
                usize::try_from(positive("HERALD_REPLAY_BATCH_SIZE", size)?).unwrap_or(usize::MAX);
        }
        if let Some(raw) = lookup("HERALD_CONSUME_REMOTE") {
            config.consume_remote = parse_flag("HERALD_CONSUME_REMOTE", &raw)?;
        }

        Ok(config)
    }
}

fn default_node_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("herald-{}", &id[..8])
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn positive(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        Err(ConfigError {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        })
    } else {
        Ok(value)
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            key,
            value: raw.to_owned(),
            reason: "expected true or false".into(),
        }),
    }
}
