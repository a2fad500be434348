//! An event loop on its own thread.
//!
//! [`LoopThread::spawn`] starts a named thread, builds the [`EventLoop`]
//! there, and returns once the loop's [`LoopHandle`] is available. The loop
//! runs until [`LoopThread::join`] or drop asks it to quit.

use super::builder::LoopBuilder;
use super::handle::LoopHandle;
use crate::error::{Error, ErrorKind, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Ready = Arc<(Mutex<Option<Result<LoopHandle>>>, Condvar)>;

/// Fills the startup slot exactly once, even if the loop thread unwinds
/// before reporting.
struct ReadySignal {
    ready: Ready,
    sent: bool,
}

impl ReadySignal {
    fn send(&mut self, result: Result<LoopHandle>) {
        if self.sent {
            return;
        }
        self.sent = true;
        let (slot, cvar) = &*self.ready;
        *slot.lock() = Some(result);
        cvar.notify_one();
    }
}

impl Drop for ReadySignal {
    fn drop(&mut self) {
        self.send(Err(Error::internal("loop thread exited before starting")));
    }
}

/// Handle to a loop running on a dedicated thread.
#[derive(Debug)]
pub struct LoopThread {
    handle: LoopHandle,
    thread: Option<JoinHandle<Result<()>>>,
}

impl LoopThread {
    /// Starts a thread named after the builder's `thread_name`, builds the
    /// loop on it and runs it.
    ///
    /// # Errors
    ///
    /// Whatever building the loop returned on the new thread, or
    /// [`ErrorKind::Internal`] if the thread could not be spawned.
    pub fn spawn(builder: LoopBuilder) -> Result<Self> {
        let name = builder.config().thread_name;
        let ready: Ready = Arc::new((Mutex::new(None), Condvar::new()));
        let mut signal = ReadySignal {
            ready: Arc::clone(&ready),
            sent: false,
        };

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let event_loop = match builder.build() {
                    Ok(event_loop) => event_loop,
                    Err(e) => {
                        signal.send(Err(e));
                        return Ok(());
                    }
                };
                signal.send(Ok(event_loop.handle()));
                drop(signal);
                event_loop.run()
            })
            .map_err(|e| {
                Error::new(ErrorKind::Internal)
                    .with_message(format!("failed to spawn loop thread {name:?}"))
                    .with_source(e)
            })?;

        let started = {
            let (slot, cvar) = &*ready;
            let mut slot = slot.lock();
            loop {
                if let Some(result) = slot.take() {
                    break result;
                }
                cvar.wait(&mut slot);
            }
        };

        match started {
            Ok(handle) => {
                tracing::info!(thread = %name, "loop thread started");
                Ok(Self {
                    handle,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    /// Handle to the running loop.
    #[must_use]
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    /// Quits the loop and waits for its thread.
    ///
    /// # Errors
    ///
    /// - the fatal error that stopped the loop, if any
    /// - [`ErrorKind::CallbackPanicked`] if a callback panic unwound the thread
    pub fn join(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.handle.quit();
        match thread.join() {
            Ok(result) => result,
            Err(payload) => Err(Error::new(ErrorKind::CallbackPanicked)
                .with_message(format!("loop thread panicked: {}", panic_message(&*payload)))),
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "loop thread ended with error");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string())
}
