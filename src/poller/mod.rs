//! Readiness-event poller.
//!
//! A [`Poller`] bridges blocking-style I/O and a cooperative scheduler: the
//! scheduler registers a file descriptor when a task needs to wait on it,
//! then a designated thread drives [`Poller::wait`] in a loop, and each
//! descriptor the OS reports ready is handed back through a callback so the
//! scheduler can mark the waiting task runnable.
//!
//! Three constraints shape the design:
//!
//! - The wait must block efficiently while nothing is ready, so it sits
//!   inside the facility's own syscall rather than spinning.
//! - No readiness notification may be missed or duplicated under concurrent
//!   registration and deregistration, so interests are armed *one-shot*:
//!   the facility disarms an interest after it fires once, and the
//!   registration protocol is an explicit per-descriptor hand-off.
//! - Any thread must be able to interrupt an in-progress wait
//!   deterministically using only the facility itself. The poller owns a
//!   private self-pipe whose read end is permanently armed; writing a byte
//!   to the other end makes the facility report it ready, and the waiting
//!   thread consumes it internally without ever surfacing it to the
//!   scheduler.

mod wakeup;

use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::{fmt, io};

use log::{debug, trace, warn};

use crate::poller::wakeup::WakeupPipe;
use crate::sys::{Events, Selector};

/// Readiness direction a [`Poller`] watches, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A read on the descriptor can proceed without blocking.
    Read,
    /// A write on the descriptor can proceed without blocking.
    Write,
}

/// Per-direction readiness-event poller.
///
/// Owns one multiplexing context and a private wakeup pipe. One designated
/// thread is expected to call [wait] in a loop; [register], [deregister],
/// and [wakeup] take `&self` and are safe to call from any thread
/// concurrently with an in-progress wait, including from inside the
/// `on_ready` callback itself.
///
/// Registrations issued before a [wait] call begins are visible to that
/// call; registrations issued while a wait is already blocked are only
/// guaranteed visible to the *next* call. A caller that needs the loop to
/// notice a fresh registration promptly should pair it with a [wakeup].
///
/// Dropping the poller releases the multiplexing context and both pipe
/// ends exactly once. Ownership rules make a drop racing an in-flight
/// [wait] unrepresentable, so a shutdown sequence only needs to stop
/// registering, issue one [wakeup], and let the loop thread observe its
/// own shutdown flag before the poller is dropped.
///
/// [wait]: Poller::wait
/// [register]: Poller::register
/// [deregister]: Poller::deregister
/// [wakeup]: Poller::wakeup
pub struct Poller {
    direction: Direction,
    selector: Selector,
    /// Scratch buffer reused across wait calls. Only the waiting thread
    /// takes this lock, and never across the blocking syscall of another
    /// operation.
    events: Mutex<Events>,
    wakeup: WakeupPipe,
}

impl Poller {
    /// Creates a poller for the given readiness direction.
    ///
    /// Fails if the multiplexing context or the wakeup pipe cannot be
    /// created. The wakeup pipe's read end is armed persistently (not
    /// one-shot) and stays registered for the poller's whole lifetime.
    pub fn new(direction: Direction) -> io::Result<Poller> {
        let selector = Selector::new()?;
        let wakeup = WakeupPipe::new()?;

        selector.arm_persistent(wakeup.read_end(), Direction::Read)?;

        debug!(
            "created {direction:?} poller (wakeup fd {})",
            wakeup.read_end()
        );

        Ok(Poller {
            direction,
            selector,
            events: Mutex::new(Events::new()),
            wakeup,
        })
    }

    /// Arms a one-shot interest for this poller's direction on `fd`.
    ///
    /// The interest is disarmed by the facility after it next fires, so a
    /// caller that wants further notifications for the same descriptor must
    /// register it again after each readiness event.
    ///
    /// Fails if the facility rejects the request (invalid descriptor,
    /// resource exhaustion); translating that into a task-level failure is
    /// the caller's responsibility.
    pub fn register(&self, fd: RawFd) -> io::Result<()> {
        self.selector.arm_oneshot(fd, self.direction)?;
        trace!("registered fd {fd} for {:?} readiness", self.direction);

        Ok(())
    }

    /// Removes any outstanding interest for `fd`. Best-effort and
    /// infallible: the race between "interest already fired" and "caller
    /// now deregistering" is inherent, so a missing interest is not an
    /// error.
    pub fn deregister(&self, fd: RawFd) {
        // Failures other than "interest not found" are swallowed here too,
        // matching the facility-tolerant contract. That can hide a
        // genuinely invalid descriptor, so it is logged rather than
        // silently dropped.
        match self.selector.delete(fd, self.direction) {
            Ok(()) => trace!("deregistered fd {fd}"),
            Err(err) => warn!("ignoring deregister failure for fd {fd}: {err}"),
        }
    }

    /// Blocks until at least one registered descriptor is ready or the
    /// timeout elapses, invoking `on_ready` once per ready descriptor.
    ///
    /// `timeout_ms` of `0` returns immediately if nothing is ready; a
    /// negative value blocks indefinitely. Up to `MAX_EVENTS_PER_WAIT`
    /// descriptors are dispatched per call, in whatever order the facility
    /// reported them — that order carries no guarantee.
    ///
    /// `on_ready` is invoked synchronously on the calling thread and is
    /// expected to be fast and non-blocking (typically it just marks a
    /// waiting task runnable). The poller's own wakeup descriptor is
    /// consumed internally and never dispatched.
    ///
    /// A wait interrupted by a signal is treated as an empty batch and
    /// returns `Ok`. Any other facility failure is surfaced, and the caller
    /// should treat this poller instance as no longer usable.
    pub fn wait<F>(&self, timeout_ms: i32, mut on_ready: F) -> io::Result<()>
    where
        F: FnMut(RawFd),
    {
        let mut events = self.events.lock().unwrap();

        match self.selector.wait(&mut events, timeout_ms) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }

        for fd in events.iter() {
            if fd == self.wakeup.read_end() {
                let drained = self.wakeup.drain();
                trace!("consumed wakeup ({drained} byte(s) drained)");
            } else {
                on_ready(fd);
            }
        }

        Ok(())
    }

    /// Forces a blocked [`Poller::wait`] call to return promptly, from any
    /// thread. Repeated wakeups before the waiting thread drains the pipe
    /// coalesce into a single notification.
    pub fn wakeup(&self) {
        self.wakeup.trigger();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // The selector context and both pipe ends close with their owners.
        debug!("shutting down {:?} poller", self.direction);
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("direction", &self.direction)
            .field("wakeup", &self.wakeup)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::sys::pipe;

    /// Pipe whose ends close on drop, used as a readiness source.
    struct TestPipe {
        rd: RawFd,
        wr: RawFd,
    }

    impl TestPipe {
        fn new() -> Self {
            let (rd, wr) = pipe::make_pipe().unwrap();
            TestPipe { rd, wr }
        }

        /// Makes the read end report read readiness.
        fn make_readable(&self) {
            pipe::write_byte(self.wr).unwrap();
        }
    }

    impl Drop for TestPipe {
        fn drop(&mut self) {
            pipe::close(self.rd);
            pipe::close(self.wr);
        }
    }

    fn collect_ready(poller: &Poller, timeout_ms: i32) -> Vec<RawFd> {
        let mut ready = Vec::new();
        poller.wait(timeout_ms, |fd| ready.push(fd)).unwrap();
        ready
    }

    #[test]
    fn test_idle_zero_timeout_returns_immediately() {
        let poller = Poller::new(Direction::Read).unwrap();

        let start = Instant::now();
        let ready = collect_ready(&poller, 0);

        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_read_readiness_dispatched_once() {
        let poller = Poller::new(Direction::Read).unwrap();
        let pipe = TestPipe::new();

        pipe.make_readable();
        poller.register(pipe.rd).unwrap();

        let start = Instant::now();
        let ready = collect_ready(&poller, 1000);

        assert_eq!(ready, vec![pipe.rd]);
        assert!(start.elapsed() < Duration::from_millis(1000));

        // The interest was one-shot: the descriptor is still readable at the
        // OS level, but without re-registering it must never be reported
        // again.
        assert!(collect_ready(&poller, 0).is_empty());
    }

    #[test]
    fn test_reregistration_after_fire() {
        let poller = Poller::new(Direction::Read).unwrap();
        let pipe = TestPipe::new();

        pipe.make_readable();
        poller.register(pipe.rd).unwrap();
        assert_eq!(collect_ready(&poller, 1000), vec![pipe.rd]);

        poller.register(pipe.rd).unwrap();
        assert_eq!(collect_ready(&poller, 1000), vec![pipe.rd]);
    }

    #[test]
    fn test_write_readiness() {
        let poller = Poller::new(Direction::Write).unwrap();
        let pipe = TestPipe::new();

        // An empty pipe's write end is immediately writable.
        poller.register(pipe.wr).unwrap();

        assert_eq!(collect_ready(&poller, 1000), vec![pipe.wr]);
    }

    #[test]
    fn test_register_invalid_fd_fails() {
        let poller = Poller::new(Direction::Read).unwrap();

        assert!(poller.register(-1).is_err());
    }

    #[test]
    fn test_deregister_unknown_fd_is_noop() {
        let poller = Poller::new(Direction::Read).unwrap();
        let pipe = TestPipe::new();

        // Never registered, already deregistered, and plain invalid: none
        // of these may panic or error.
        poller.deregister(pipe.rd);
        poller.deregister(pipe.rd);
        poller.deregister(-1);
    }

    #[test]
    fn test_deregister_prevents_dispatch() {
        let poller = Poller::new(Direction::Read).unwrap();
        let pipe = TestPipe::new();

        poller.register(pipe.rd).unwrap();
        poller.deregister(pipe.rd);
        pipe.make_readable();

        assert!(collect_ready(&poller, 0).is_empty());
    }

    #[test]
    fn test_wakeup_unblocks_indefinite_wait() {
        let poller = Arc::new(Poller::new(Direction::Read).unwrap());
        let callbacks = AtomicUsize::new(0);

        let waker = {
            let poller = Arc::clone(&poller);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                poller.wakeup();
            })
        };

        // Indefinite wait; only the concurrent wakeup can end it. The
        // wakeup descriptor itself must never reach the callback.
        poller
            .wait(-1, |_| {
                callbacks.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        assert_eq!(callbacks.load(Ordering::Relaxed), 0);
        waker.join().unwrap();
    }

    #[test]
    fn test_wakeups_coalesce() {
        let poller = Poller::new(Direction::Read).unwrap();

        poller.wakeup();
        poller.wakeup();
        poller.wakeup();

        // A single pending notification byte: the first wait consumes it
        // promptly, and the second finds the pipe empty again.
        let start = Instant::now();
        assert!(collect_ready(&poller, 5000).is_empty());
        assert!(start.elapsed() < Duration::from_millis(1000));

        let start = Instant::now();
        assert!(collect_ready(&poller, 100).is_empty());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_wakeup_rearms_after_drain() {
        let poller = Poller::new(Direction::Read).unwrap();

        for _ in 0..3 {
            poller.wakeup();

            let start = Instant::now();
            assert!(collect_ready(&poller, 5000).is_empty());
            assert!(start.elapsed() < Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_readiness_while_blocked() {
        let poller = Poller::new(Direction::Read).unwrap();
        let pipe = TestPipe::new();

        poller.register(pipe.rd).unwrap();

        let wr = pipe.wr;
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            pipe::write_byte(wr).unwrap();
        });

        let mut ready = Vec::new();
        poller.wait(-1, |fd| ready.push(fd)).unwrap();

        assert_eq!(ready, vec![pipe.rd]);
        writer.join().unwrap();
    }

    #[test]
    fn test_read_and_write_pollers_coexist() {
        let read_poller = Poller::new(Direction::Read).unwrap();
        let write_poller = Poller::new(Direction::Write).unwrap();
        let pipe = TestPipe::new();

        pipe.make_readable();
        read_poller.register(pipe.rd).unwrap();
        write_poller.register(pipe.wr).unwrap();

        assert_eq!(collect_ready(&read_poller, 1000), vec![pipe.rd]);
        assert_eq!(collect_ready(&write_poller, 1000), vec![pipe.wr]);
    }

    #[test]
    fn test_register_from_inside_callback() {
        let poller = Poller::new(Direction::Read).unwrap();
        let pipe = TestPipe::new();

        pipe.make_readable();
        poller.register(pipe.rd).unwrap();

        // Re-arming from inside the dispatch callback is the natural shape
        // of a scheduler's "still interested" path and must not deadlock.
        let mut fired = 0;
        poller
            .wait(1000, |fd| {
                fired += 1;
                poller.register(fd).unwrap();
            })
            .unwrap();

        assert_eq!(fired, 1);
        assert_eq!(collect_ready(&poller, 1000), vec![pipe.rd]);
    }
}
