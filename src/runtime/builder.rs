//! Event loop builder.
//!
//! ```no_run
//! use reactimer::runtime::LoopBuilder;
//! use std::time::Duration;
//!
//! let event_loop = LoopBuilder::new()
//!     .with_env_overrides()?
//!     .poll_timeout(Duration::from_secs(1))
//!     .build()?;
//! # Ok::<(), reactimer::Error>(())
//! ```
//!
//! Values set through builder methods win over environment overrides, which
//! win over a TOML file, which wins over [`LoopConfig::default()`].

use super::config::{CallbackPanicPolicy, LoopConfig};
use super::env_config;
use super::event_loop::EventLoop;
use super::loop_thread::LoopThread;
use crate::error::Result;
use crate::time::{MissedTickBehavior, TimeSource, TimerFacility, WallClock};
use std::sync::Arc;
use std::time::Duration;

/// Values set explicitly through builder methods.
#[derive(Debug, Clone, Default)]
struct Explicit {
    events_capacity: Option<usize>,
    poll_timeout: Option<Duration>,
    min_arm_delay: Option<Duration>,
    missed_tick_behavior: Option<MissedTickBehavior>,
    callback_panic: Option<CallbackPanicPolicy>,
    thread_name: Option<String>,
}

impl Explicit {
    fn apply(&self, config: &mut LoopConfig) {
        if let Some(v) = self.events_capacity {
            config.events_capacity = v;
        }
        if let Some(v) = self.poll_timeout {
            config.poll_timeout = v;
        }
        if let Some(v) = self.min_arm_delay {
            config.min_arm_delay = v;
        }
        if let Some(v) = self.missed_tick_behavior {
            config.missed_tick_behavior = v;
        }
        if let Some(v) = self.callback_panic {
            config.callback_panic = v;
        }
        if let Some(ref v) = self.thread_name {
            config.thread_name.clone_from(v);
        }
    }
}

/// Builder for [`EventLoop`] and [`LoopThread`].
///
/// The builder is `Send`, so it can be handed to the thread that will own the
/// loop.
#[derive(Debug, Default)]
pub struct LoopBuilder {
    base: LoopConfig,
    explicit: Explicit,
    clock: Option<Arc<dyn TimeSource>>,
    facility: Option<Box<dyn TimerFacility + Send>>,
}

impl LoopBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    #[must_use]
    pub fn from_config(config: LoopConfig) -> Self {
        Self {
            base: config,
            ..Self::default()
        }
    }

    /// Starts from a TOML config file.
    ///
    /// # Errors
    ///
    /// [`Config`](crate::ErrorKind::Config) if the file cannot be read or parsed.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let toml = env_config::parse_toml_file(path.as_ref())?;
        let mut config = LoopConfig::default();
        env_config::apply_toml_config(&mut config, &toml)?;
        Ok(Self::from_config(config))
    }

    /// Starts from a TOML string.
    ///
    /// # Errors
    ///
    /// [`Config`](crate::ErrorKind::Config) if the string cannot be parsed.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let toml = env_config::parse_toml_str(toml)?;
        let mut config = LoopConfig::default();
        env_config::apply_toml_config(&mut config, &toml)?;
        Ok(Self::from_config(config))
    }

    /// Applies `REACTIMER_*` environment variables on top of the base config.
    ///
    /// # Errors
    ///
    /// [`Config`](crate::ErrorKind::Config) if a variable is set to an
    /// unparseable value.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        env_config::apply_env_overrides(&mut self.base)?;
        Ok(self)
    }

    /// Maximum readiness events handled per poll.
    #[must_use]
    pub fn events_capacity(mut self, n: usize) -> Self {
        self.explicit.events_capacity = Some(n);
        self
    }

    /// Longest a single poll blocks when nothing wakes it.
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.explicit.poll_timeout = Some(timeout);
        self
    }

    /// Minimum delay programmed into the default timer facility.
    #[must_use]
    pub fn min_arm_delay(mut self, delay: Duration) -> Self {
        self.explicit.min_arm_delay = Some(delay);
        self
    }

    /// How repeating timers catch up after a late firing.
    #[must_use]
    pub fn missed_tick_behavior(mut self, behavior: MissedTickBehavior) -> Self {
        self.explicit.missed_tick_behavior = Some(behavior);
        self
    }

    /// What happens after a timer callback panics.
    #[must_use]
    pub fn callback_panic(mut self, policy: CallbackPanicPolicy) -> Self {
        self.explicit.callback_panic = Some(policy);
        self
    }

    /// Name for the thread started by [`spawn`](Self::spawn).
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.explicit.thread_name = Some(name.into());
        self
    }

    /// Replaces the wall clock, e.g. with a
    /// [`VirtualClock`](crate::time::VirtualClock).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the platform timer facility.
    #[must_use]
    pub fn facility(mut self, facility: impl TimerFacility + Send + 'static) -> Self {
        self.facility = Some(Box::new(facility));
        self
    }

    /// The configuration [`build`](Self::build) will use.
    #[must_use]
    pub fn config(&self) -> LoopConfig {
        let mut config = self.base.clone();
        self.explicit.apply(&mut config);
        config.normalize();
        config
    }

    /// Builds the loop on the calling thread.
    ///
    /// # Errors
    ///
    /// See [`EventLoop::new`].
    pub fn build(self) -> Result<EventLoop> {
        let config = self.config();
        let facility: Box<dyn TimerFacility> = match self.facility {
            Some(facility) => facility as Box<dyn TimerFacility>,
            None => default_facility(&config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(WallClock::new()));
        EventLoop::from_parts(&config, facility, clock)
    }

    /// Builds the loop on a new thread and runs it there.
    ///
    /// # Errors
    ///
    /// See [`LoopThread::spawn`].
    pub fn spawn(self) -> Result<LoopThread> {
        LoopThread::spawn(self)
    }
}

#[cfg(target_os = "linux")]
fn default_facility(config: &LoopConfig) -> Result<Box<dyn TimerFacility>> {
    let timerfd = crate::time::TimerFd::with_min_delay(config.min_arm_delay)
        .map_err(|e| crate::Error::facility("create", e))?;
    Ok(Box::new(timerfd))
}

#[cfg(not(target_os = "linux"))]
fn default_facility(_config: &LoopConfig) -> Result<Box<dyn TimerFacility>> {
    Err(crate::Error::new(crate::ErrorKind::Unsupported)
        .with_message("no kernel timer facility on this platform; supply one with LoopBuilder::facility"))
}
