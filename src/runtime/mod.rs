//! The owning event loop and its cross-thread plumbing.
//!
//! - [`event_loop`]: [`EventLoop`], the `!Send` reactor loop that owns a
//!   [`TimerQueue`](crate::time::TimerQueue)
//! - [`handle`]: [`LoopHandle`], the `Send + Sync` marshaling front end
//! - [`loop_thread`]: [`LoopThread`], a loop on a dedicated thread
//! - [`reactor`]: readiness polling
//! - [`config`], [`env_config`], [`builder`]: configuration
//!
//! # Threading Model
//!
//! ```text
//!   foreign threads                      loop thread
//!   ───────────────                      ───────────
//!   LoopHandle::run_after ──┐
//!   LoopHandle::cancel ─────┼──▶ SegQueue ──▶ EventLoop::turn
//!   LoopHandle::quit ───────┘      │            ├─ Reactor::poll
//!                                  └─ wake ────▶│
//!                                               ├─ TimerQueue::handle_read
//!                                               └─ pending functors
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use reactimer::runtime::LoopBuilder;
//!
//! // Requires the `config-file` feature.
//! let event_loop = LoopBuilder::from_toml("config/loop.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod event_loop;
pub mod handle;
pub mod loop_thread;
pub mod reactor;

pub use builder::LoopBuilder;
pub use config::{CallbackPanicPolicy, LoopConfig};
pub use event_loop::EventLoop;
pub use handle::LoopHandle;
pub use loop_thread::LoopThread;
