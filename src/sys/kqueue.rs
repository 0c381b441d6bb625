use std::os::unix::io::RawFd;
use std::{io, mem, ptr};

use crate::poller::Direction;
use crate::sys::{MAX_EVENTS_PER_WAIT, errno};

/// Multiplexing facility backed by `kqueue(2)`.
///
/// Owns one kernel event queue. Interests are `(ident, filter)` pairs, so a
/// read and a write interest on the same descriptor never collide; each
/// `Selector` only ever submits the single filter its poller is fixed to,
/// plus `EVFILT_READ` for the wakeup descriptor.
pub(crate) struct Selector {
    /// File descriptor of the `kqueue(2)` instance.
    kqfd: RawFd,
}

impl Selector {
    /// Creates a new `kqueue(2)` instance, closed on `exec`.
    pub(crate) fn new() -> io::Result<Self> {
        let kqfd = unsafe { libc::kqueue() };
        if kqfd == -1 {
            return Err(errno!("failed to create kqueue instance"));
        }

        // kqueue descriptors are not close-on-exec by default.
        if unsafe { libc::fcntl(kqfd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            let err = errno!("failed to set FD_CLOEXEC on kqueue instance");
            unsafe {
                libc::close(kqfd);
            }
            return Err(err);
        }

        Ok(Selector { kqfd })
    }

    /// Arms a one-shot interest for `direction` readiness on `fd`.
    ///
    /// The interest is disarmed by the kernel after it fires once
    /// (`EV_ONESHOT`); re-arming requires submitting the change again.
    pub(crate) fn arm_oneshot(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        if self.change(fd, filter(direction), libc::EV_ADD | libc::EV_ONESHOT) == -1 {
            return Err(errno!("failed to arm one-shot interest for fd {fd}"));
        }

        Ok(())
    }

    /// Arms a persistent interest for `direction` readiness on `fd`. Used
    /// for the poller's own wakeup descriptor, which must stay armed across
    /// every wait call.
    pub(crate) fn arm_persistent(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        if self.change(fd, filter(direction), libc::EV_ADD) == -1 {
            return Err(errno!("failed to arm persistent interest for fd {fd}"));
        }

        Ok(())
    }

    /// Removes any outstanding interest for `fd` under the poller's filter.
    ///
    /// An interest that was never added (or that a fired one-shot already
    /// discarded) reports `ENOENT`, which is tolerated; every other failure
    /// is surfaced.
    pub(crate) fn delete(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        if self.change(fd, filter(direction), libc::EV_DELETE) == -1 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }

            return Err(errno!("failed to remove interest for fd {fd} from kqueue"));
        }

        Ok(())
    }

    fn change(&self, fd: RawFd, filter: i16, flags: u16) -> i32 {
        // Only `ident`, `filter`, and `flags` are meaningful for the changes
        // this poller submits; the rest stay zeroed.
        let mut kev: libc::kevent = unsafe { mem::zeroed() };
        kev.ident = fd as libc::uintptr_t;
        kev.filter = filter;
        kev.flags = flags;

        // With an empty eventlist, a failed change is reported through the
        // return value rather than an `EV_ERROR` entry.
        unsafe { libc::kevent(self.kqfd, &raw const kev, 1, ptr::null_mut(), 0, ptr::null()) }
    }

    /// Blocks until at least one armed descriptor is ready or the timeout
    /// elapses, filling `events` with the ready batch.
    ///
    /// `timeout_ms` of `0` returns immediately; a negative value blocks
    /// indefinitely (null `timespec`). Returns the number of ready
    /// descriptors decoded, `0` on timeout.
    pub(crate) fn wait(&self, events: &mut Events, timeout_ms: i32) -> io::Result<usize> {
        events.len = 0;

        let timeout = if timeout_ms >= 0 {
            Some(libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
            })
        } else {
            None
        };

        let ts_ptr = timeout
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        let n = unsafe {
            libc::kevent(
                self.kqfd,
                ptr::null(),
                0,
                events.buf.as_mut_ptr(),
                events.buf.len() as i32,
                ts_ptr,
            )
        };

        if n == -1 {
            return Err(errno!("failed to wait on kqueue"));
        }

        events.len = n as usize;
        Ok(events.len)
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kqfd);
        }
    }
}

/// Reusable buffer the kernel fills with ready-descriptor reports.
pub(crate) struct Events {
    buf: [libc::kevent; MAX_EVENTS_PER_WAIT],
    /// Number of valid entries from the most recent wait.
    len: usize,
}

// `kevent` carries a raw `udata` pointer, which suppresses the automatic
// impls. This poller never sets or dereferences it; events are plain data
// decoded on the waiting thread.
unsafe impl Send for Events {}
unsafe impl Sync for Events {}

impl Events {
    pub(crate) fn new() -> Self {
        Events {
            buf: unsafe { mem::zeroed() },
            len: 0,
        }
    }

    /// Descriptors decoded from the most recent wait call.
    pub(crate) fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.buf[..self.len].iter().map(|ev| ev.ident as RawFd)
    }
}

fn filter(direction: Direction) -> i16 {
    match direction {
        Direction::Read => libc::EVFILT_READ,
        Direction::Write => libc::EVFILT_WRITE,
    }
}
