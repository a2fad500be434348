//! `polling`-backed reactor (epoll on Linux).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       PollReactor                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌───────────────────┐  │
//! │  │   Poller    │  │  notify()   │  │ registration map  │  │
//! │  │  (polling)  │  │  (builtin)  │  │ HashMap<Token, fd>│  │
//! │  └─────────────┘  └─────────────┘  └───────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Thread Safety
//!
//! `PollReactor` is `Send + Sync`. Registration bookkeeping and the scratch
//! event buffer sit behind `parking_lot` mutexes; `wake()` is lock-free.

use super::{Event, Events, Interest, Reactor, Token};
use parking_lot::Mutex;
use polling::{Event as PollEvent, PollMode, Poller};
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

/// Level-triggered reactor over the `polling` crate.
pub struct PollReactor {
    poller: Poller,
    registrations: Mutex<HashMap<Token, RawFd>>,
    scratch: Mutex<Vec<PollEvent>>,
}

impl PollReactor {
    /// Creates a new reactor.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS poller cannot be created (e.g., out of file
    /// descriptors).
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            registrations: Mutex::new(HashMap::new()),
            scratch: Mutex::new(Vec::new()),
        })
    }

    /// Converts our Interest flags to polling crate's event.
    fn interest_to_poll_event(token: Token, interest: Interest) -> PollEvent {
        if interest.is_readable() {
            PollEvent::readable(token.0)
        } else {
            PollEvent::none(token.0)
        }
    }

    /// Converts polling crate's event to our Interest type. Writability is
    /// never registered, so it is never reported.
    fn poll_event_to_interest(event: &PollEvent) -> Interest {
        if event.readable {
            Interest::READABLE
        } else {
            Interest::NONE
        }
    }
}

impl Reactor for PollReactor {
    fn register(&self, fd: BorrowedFd<'_>, token: Token, interest: Interest) -> io::Result<()> {
        let mut regs = self.registrations.lock();
        if regs.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }
        let raw = fd.as_raw_fd();
        self.poller.add_with_mode(
            raw,
            Self::interest_to_poll_event(token, interest),
            PollMode::Level,
        )?;
        regs.insert(token, raw);
        tracing::debug!(?token, fd = raw, "descriptor registered");
        Ok(())
    }

    fn deregister(&self, fd: BorrowedFd<'_>, token: Token) -> io::Result<()> {
        let mut regs = self.registrations.lock();
        if regs.remove(&token).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "token not registered",
            ));
        }
        self.poller.delete(fd.as_raw_fd())?;
        tracing::debug!(?token, "descriptor deregistered");
        Ok(())
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        let mut scratch = self.scratch.lock();
        scratch.clear();

        self.poller.wait(&mut scratch, timeout)?;

        for poll_event in scratch.iter() {
            let interest = Self::poll_event_to_interest(poll_event);
            events.push(Event::new(Token(poll_event.key), interest));
        }
        Ok(events.len())
    }

    fn wake(&self) -> io::Result<()> {
        self.poller.notify()
    }

    fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl std::fmt::Debug for PollReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollReactor")
            .field("registration_count", &self.registrations.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn create_reactor() {
        let reactor = PollReactor::new().expect("failed to create reactor");
        assert_eq!(reactor.registration_count(), 0);
    }

    #[test]
    fn readable_source_reports_until_drained() {
        let reactor = PollReactor::new().expect("failed to create reactor");
        let (reader, mut writer) = UnixStream::pair().expect("socket pair");
        let token = Token::new(3);
        reactor
            .register(reader.as_fd(), token, Interest::READABLE)
            .expect("register failed");

        writer.write_all(b"x").expect("write");
        let mut events = Events::with_capacity(8);
        for _ in 0..2 {
            let n = reactor
                .poll(&mut events, Some(Duration::from_millis(100)))
                .expect("poll failed");
            assert_eq!(n, 1);
            let event = events.iter().next().expect("one event");
            assert_eq!(event.token, token);
            assert!(event.is_readable());
        }

        reactor
            .deregister(reader.as_fd(), token)
            .expect("deregister failed");
        assert_eq!(reactor.registration_count(), 0);
    }

    #[test]
    fn only_readable_interest_is_translated() {
        let event = PollReactor::interest_to_poll_event(Token::new(7), Interest::READABLE);
        assert_eq!(event.key, 7);
        assert!(event.readable);
        assert!(!event.writable);

        let none = PollReactor::interest_to_poll_event(Token::new(7), Interest::NONE);
        assert!(!none.readable && !none.writable);

        let writable_only = PollEvent::writable(2);
        assert_eq!(
            PollReactor::poll_event_to_interest(&writable_only),
            Interest::NONE
        );
        assert_eq!(
            PollReactor::poll_event_to_interest(&PollEvent::all(2)),
            Interest::READABLE
        );
    }

    #[test]
    fn duplicate_token_rejected() {
        let reactor = PollReactor::new().expect("failed to create reactor");
        let (a, b) = UnixStream::pair().expect("socket pair");
        reactor
            .register(a.as_fd(), Token::new(1), Interest::READABLE)
            .expect("register failed");
        let err = reactor
            .register(b.as_fd(), Token::new(1), Interest::READABLE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn deregister_not_found() {
        let reactor = PollReactor::new().expect("failed to create reactor");
        let (a, _b) = UnixStream::pair().expect("socket pair");
        let err = reactor.deregister(a.as_fd(), Token::new(999)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn wake_interrupts_poll() {
        let reactor = Arc::new(PollReactor::new().expect("failed to create reactor"));
        let waker = Arc::clone(&reactor);
        let start = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake().expect("wake failed");
        });

        let mut events = Events::with_capacity(4);
        let n = reactor
            .poll(&mut events, Some(Duration::from_secs(5)))
            .expect("poll failed");
        assert_eq!(n, 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().expect("waker thread");
    }
}
