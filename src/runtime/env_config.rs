//! Environment variable and config file support for [`LoopBuilder`](super::builder::LoopBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via builder methods (`poll_timeout(..)`)
//! 2. **Environment variables** — values from `REACTIMER_*` env vars
//! 3. **Config file** — values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults** — built-in defaults from [`LoopConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `REACTIMER_EVENTS_CAPACITY` | `usize` | `events_capacity` |
//! | `REACTIMER_POLL_TIMEOUT_MS` | `u64` | `poll_timeout` |
//! | `REACTIMER_MIN_ARM_DELAY_US` | `u64` | `min_arm_delay` |
//! | `REACTIMER_MISSED_TICK` | `burst`/`delay`/`skip` | `missed_tick_behavior` |
//! | `REACTIMER_CALLBACK_PANIC` | `propagate`/`abort` | `callback_panic` |
//! | `REACTIMER_THREAD_NAME` | `String` | `thread_name` |

use crate::error::{Error, Result};
use crate::runtime::config::{CallbackPanicPolicy, LoopConfig};
use crate::time::MissedTickBehavior;
use std::time::Duration;

/// Environment variable name for the per-poll event capacity.
pub const ENV_EVENTS_CAPACITY: &str = "REACTIMER_EVENTS_CAPACITY";
/// Environment variable name for the poll timeout in milliseconds.
pub const ENV_POLL_TIMEOUT_MS: &str = "REACTIMER_POLL_TIMEOUT_MS";
/// Environment variable name for the minimum facility arm delay in microseconds.
pub const ENV_MIN_ARM_DELAY_US: &str = "REACTIMER_MIN_ARM_DELAY_US";
/// Environment variable name for the missed-tick behavior.
pub const ENV_MISSED_TICK: &str = "REACTIMER_MISSED_TICK";
/// Environment variable name for the callback panic policy.
pub const ENV_CALLBACK_PANIC: &str = "REACTIMER_CALLBACK_PANIC";
/// Environment variable name for the loop thread name.
pub const ENV_THREAD_NAME: &str = "REACTIMER_THREAD_NAME";

/// Apply environment variable overrides to a [`LoopConfig`].
///
/// Only variables that are set in the environment are applied.
///
/// # Errors
///
/// Returns a [`Config`](crate::ErrorKind::Config) error if a variable is set
/// but contains an unparseable value.
pub fn apply_env_overrides(config: &mut LoopConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_EVENTS_CAPACITY) {
        config.events_capacity = parse_usize(ENV_EVENTS_CAPACITY, &val)?;
    }
    if let Some(val) = read_env(ENV_POLL_TIMEOUT_MS) {
        config.poll_timeout = Duration::from_millis(parse_u64(ENV_POLL_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_MIN_ARM_DELAY_US) {
        config.min_arm_delay = Duration::from_micros(parse_u64(ENV_MIN_ARM_DELAY_US, &val)?);
    }
    if let Some(val) = read_env(ENV_MISSED_TICK) {
        config.missed_tick_behavior = parse_missed_tick(ENV_MISSED_TICK, &val)?;
    }
    if let Some(val) = read_env(ENV_CALLBACK_PANIC) {
        config.callback_panic = parse_panic_policy(ENV_CALLBACK_PANIC, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME) {
        config.thread_name = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64> {
    val.trim().parse::<u64>().map_err(|e| {
        Error::config(format!(
            "invalid value for {var_name}: expected u64, got {val:?} ({e})"
        ))
    })
}

fn parse_missed_tick(var_name: &str, val: &str) -> Result<MissedTickBehavior> {
    match val.trim().to_lowercase().as_str() {
        "burst" => Ok(MissedTickBehavior::Burst),
        "delay" => Ok(MissedTickBehavior::Delay),
        "skip" => Ok(MissedTickBehavior::Skip),
        _ => Err(Error::config(format!(
            "invalid value for {var_name}: expected burst/delay/skip, got {val:?}"
        ))),
    }
}

fn parse_panic_policy(var_name: &str, val: &str) -> Result<CallbackPanicPolicy> {
    match val.trim().to_lowercase().as_str() {
        "propagate" => Ok(CallbackPanicPolicy::Propagate),
        "abort" => Ok(CallbackPanicPolicy::Abort),
        _ => Err(Error::config(format!(
            "invalid value for {var_name}: expected propagate/abort, got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable loop configuration.
///
/// ```toml
/// [event_loop]
/// events_capacity = 32
/// poll_timeout_ms = 5000
/// thread_name = "io-loop"
///
/// [timers]
/// min_arm_delay_us = 100
/// missed_tick = "skip"
/// callback_panic = "propagate"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LoopTomlConfig {
    /// Event loop settings.
    #[serde(default)]
    pub event_loop: EventLoopToml,
    /// Timer queue settings.
    #[serde(default)]
    pub timers: TimersToml,
}

/// Event loop section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct EventLoopToml {
    /// Maximum readiness events handled per poll.
    pub events_capacity: Option<usize>,
    /// Poll timeout in milliseconds.
    pub poll_timeout_ms: Option<u64>,
    /// Loop thread name.
    pub thread_name: Option<String>,
}

/// Timer section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TimersToml {
    /// Minimum facility arm delay in microseconds.
    pub min_arm_delay_us: Option<u64>,
    /// `burst`, `delay`, or `skip`.
    pub missed_tick: Option<String>,
    /// `propagate` or `abort`.
    pub callback_panic: Option<String>,
}

/// Apply a parsed TOML config to a [`LoopConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
///
/// # Errors
///
/// Returns a [`Config`](crate::ErrorKind::Config) error for unknown enum names.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut LoopConfig, toml: &LoopTomlConfig) -> Result<()> {
    if let Some(v) = toml.event_loop.events_capacity {
        config.events_capacity = v;
    }
    if let Some(v) = toml.event_loop.poll_timeout_ms {
        config.poll_timeout = Duration::from_millis(v);
    }
    if let Some(ref v) = toml.event_loop.thread_name {
        config.thread_name.clone_from(v);
    }
    if let Some(v) = toml.timers.min_arm_delay_us {
        config.min_arm_delay = Duration::from_micros(v);
    }
    if let Some(ref v) = toml.timers.missed_tick {
        config.missed_tick_behavior = parse_missed_tick("timers.missed_tick", v)?;
    }
    if let Some(ref v) = toml.timers.callback_panic {
        config.callback_panic = parse_panic_policy("timers.callback_panic", v)?;
    }
    Ok(())
}

/// Parse a TOML string into a [`LoopTomlConfig`].
///
/// # Errors
///
/// Returns a [`Config`](crate::ErrorKind::Config) error on malformed TOML.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<LoopTomlConfig> {
    toml::from_str(toml_str)
        .map_err(|e| Error::config(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`LoopTomlConfig`].
///
/// # Errors
///
/// Returns a [`Config`](crate::ErrorKind::Config) error if the file cannot be
/// read or parsed.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<LoopTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
