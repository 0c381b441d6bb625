//! Anonymous unidirectional pipes with non-blocking ends.
//!
//! The poller uses a pipe purely as a self-notification channel: a single
//! byte written to the write end makes the read end report read readiness,
//! which interrupts a blocked wait.

use std::io;
use std::os::unix::io::RawFd;

use crate::sys::errno;

/// Creates an anonymous pipe, returning `(read_end, write_end)`.
///
/// Both ends are non-blocking and close-on-exec.
pub(crate) fn make_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];

    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } == -1 {
                return Err(errno!("failed to create pipe"));
            }
        } else {
            if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
                return Err(errno!("failed to create pipe"));
            }

            for &fd in &fds {
                if let Err(err) = set_nonblocking_cloexec(fd) {
                    close(fds[0]);
                    close(fds[1]);
                    return Err(err);
                }
            }
        }
    }

    Ok((fds[0], fds[1]))
}

/// Writes a single zero byte to `fd`.
///
/// A short or failed write is reported as an error; with a non-blocking
/// pipe this means the buffer is full or the read end is gone.
pub(crate) fn write_byte(fd: RawFd) -> io::Result<()> {
    let buf = [0u8; 1];

    let n = unsafe { libc::write(fd, buf.as_ptr() as *const _, 1) };
    if n != 1 {
        return Err(errno!("failed to write notification byte to pipe"));
    }

    Ok(())
}

/// Reads and discards every buffered byte from `fd`, returning how many
/// bytes were drained.
pub(crate) fn drain(fd: RawFd) -> io::Result<usize> {
    let mut buf = [0u8; 64];
    let mut total = 0;

    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };

        match n {
            1.. => total += n as usize,
            // Write end closed; nothing more will arrive.
            0 => return Ok(total),
            _ => {
                return match io::Error::last_os_error().kind() {
                    io::ErrorKind::WouldBlock => Ok(total),
                    io::ErrorKind::Interrupted => continue,
                    _ => Err(errno!("failed to drain pipe")),
                };
            }
        }
    }
}

/// Closes `fd`, ignoring errors.
pub(crate) fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(errno!("failed to set O_NONBLOCK on pipe fd {fd}"));
        }

        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) == -1 {
            return Err(errno!("failed to set FD_CLOEXEC on pipe fd {fd}"));
        }
    }

    Ok(())
}
