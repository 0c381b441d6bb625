use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::{fmt, io};

use crate::sys::pipe;

/// Single-slot, edge-coalescing wakeup semaphore backed by a self-pipe.
///
/// The pipe and a guarded flag together guarantee that at most one
/// notification byte is ever buffered: [trigger] writes a byte only on the
/// flag's `false -> true` transition, and [drain] empties the pipe and
/// clears the flag under the same lock. At least one wakeup is delivered
/// for every such transition, but repeated triggers before a drain coalesce
/// into one — the waiter only needs to be told to return, not how often it
/// was asked.
///
/// [trigger]: WakeupPipe::trigger
/// [drain]: WakeupPipe::drain
pub(crate) struct WakeupPipe {
    read_end: RawFd,
    write_end: RawFd,
    /// True iff a notification byte is buffered in the pipe and not yet
    /// drained.
    triggered: Mutex<bool>,
}

impl WakeupPipe {
    pub(crate) fn new() -> io::Result<Self> {
        let (read_end, write_end) = pipe::make_pipe()?;

        Ok(WakeupPipe {
            read_end,
            write_end,
            triggered: Mutex::new(false),
        })
    }

    /// Descriptor the poller keeps permanently armed for read readiness.
    pub(crate) fn read_end(&self) -> RawFd {
        self.read_end
    }

    /// Requests that a blocked wait call return promptly. Safe to call from
    /// any thread; a no-op while a previous trigger is still undrained.
    ///
    /// # Panics
    ///
    /// Panics if the pipe write fails. The pipe holds at most one byte while
    /// the flag invariant holds, so a full (or closed) pipe here means the
    /// invariant is already broken, and dropping the wakeup would leave the
    /// waiter blocked with no one to wake it.
    pub(crate) fn trigger(&self) {
        let mut triggered = self.triggered.lock().unwrap();

        if !*triggered {
            if let Err(err) = pipe::write_byte(self.write_end) {
                panic!("wakeup pipe write failed: {err}");
            }

            *triggered = true;
        }
    }

    /// Empties the pipe and clears the flag, returning how many bytes were
    /// drained. Called by the waiting thread when the read end reports
    /// ready.
    ///
    /// # Panics
    ///
    /// Panics if the pipe read fails for any reason other than "nothing
    /// buffered", which would leave the flag claiming a byte that can no
    /// longer be observed.
    pub(crate) fn drain(&self) -> usize {
        let mut triggered = self.triggered.lock().unwrap();

        let drained = match pipe::drain(self.read_end) {
            Ok(n) => n,
            Err(err) => panic!("wakeup pipe drain failed: {err}"),
        };

        *triggered = false;
        drained
    }
}

impl Drop for WakeupPipe {
    fn drop(&mut self) {
        pipe::close(self.read_end);
        pipe::close(self.write_end);
    }
}

impl fmt::Debug for WakeupPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeupPipe")
            .field("read_end", &self.read_end)
            .field("write_end", &self.write_end)
            .finish_non_exhaustive()
    }
}
