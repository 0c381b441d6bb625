use std::os::unix::io::RawFd;
use std::{io, ptr};

use crate::poller::Direction;
use crate::sys::{MAX_EVENTS_PER_WAIT, errno};

/// Multiplexing facility backed by `epoll(7)`.
///
/// Owns one epoll instance. Interests are keyed by file descriptor; the
/// descriptor itself rides in the event's user data so the waiting side can
/// decode which descriptor fired without a lookup table.
pub(crate) struct Selector {
    /// File descriptor of the `epoll(7)` instance.
    epfd: RawFd,
}

impl Selector {
    /// Creates a new `epoll(7)` instance, closed on `exec`.
    pub(crate) fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(errno!("failed to create epoll instance"));
        }

        Ok(Selector { epfd })
    }

    /// Arms a one-shot interest for `direction` readiness on `fd`.
    ///
    /// `EPOLLONESHOT` disables the interest after it fires once, but leaves
    /// the entry in the interest list, so re-arming a fired descriptor is a
    /// modify rather than an add.
    pub(crate) fn arm_oneshot(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        let events = interest_bits(direction) | libc::EPOLLONESHOT as u32;

        if self.ctl(libc::EPOLL_CTL_ADD, fd, events) == -1 {
            // The descriptor already has a (fired, disabled) one-shot entry.
            if io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
                if self.ctl(libc::EPOLL_CTL_MOD, fd, events) == -1 {
                    return Err(errno!("failed to re-arm fd {fd} in epoll interest list"));
                }
                return Ok(());
            }

            return Err(errno!("failed to add fd {fd} to epoll interest list"));
        }

        Ok(())
    }

    /// Arms a persistent, level-triggered interest for `direction` readiness
    /// on `fd`. Used for the poller's own wakeup descriptor, which must stay
    /// armed across every wait call.
    pub(crate) fn arm_persistent(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        if self.ctl(libc::EPOLL_CTL_ADD, fd, interest_bits(direction)) == -1 {
            return Err(errno!("failed to add fd {fd} to epoll interest list"));
        }

        Ok(())
    }

    /// Removes any outstanding interest for `fd`.
    ///
    /// An interest that was never added (or was a one-shot on a facility
    /// that already discarded it) reports `ENOENT`, which is tolerated;
    /// every other failure is surfaced.
    pub(crate) fn delete(&self, fd: RawFd, _direction: Direction) -> io::Result<()> {
        if unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) } == -1 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }

            return Err(errno!("failed to remove fd {fd} from epoll interest list"));
        }

        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, events: u32) -> i32 {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };

        unsafe { libc::epoll_ctl(self.epfd, op, fd, &raw mut ev) }
    }

    /// Blocks until at least one armed descriptor is ready or the timeout
    /// elapses, filling `events` with the ready batch.
    ///
    /// `timeout_ms` of `0` returns immediately; a negative value blocks
    /// indefinitely. Returns the number of ready descriptors decoded, `0` on
    /// timeout.
    pub(crate) fn wait(&self, events: &mut Events, timeout_ms: i32) -> io::Result<usize> {
        events.len = 0;

        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                events.buf.as_mut_ptr(),
                events.buf.len() as i32,
                timeout_ms,
            )
        };

        if n == -1 {
            return Err(errno!("failed to wait on epoll"));
        }

        events.len = n as usize;
        Ok(events.len)
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// Reusable buffer the kernel fills with ready-descriptor reports.
pub(crate) struct Events {
    buf: [libc::epoll_event; MAX_EVENTS_PER_WAIT],
    /// Number of valid entries from the most recent wait.
    len: usize,
}

impl Events {
    pub(crate) fn new() -> Self {
        Events {
            buf: [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS_PER_WAIT],
            len: 0,
        }
    }

    /// Descriptors decoded from the most recent wait call.
    pub(crate) fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.buf[..self.len].iter().map(|ev| ev.u64 as RawFd)
    }
}

fn interest_bits(direction: Direction) -> u32 {
    match direction {
        Direction::Read => libc::EPOLLIN as u32,
        Direction::Write => libc::EPOLLOUT as u32,
    }
}
