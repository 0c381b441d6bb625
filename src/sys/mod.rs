//! Platform backends for the OS multiplexing facility.
//!
//! Each backend exposes the same narrow surface: create a context, arm or
//! remove a per-descriptor interest, and block until a batch of descriptors
//! is ready. The concrete `Selector` and its `Events` buffer are chosen at
//! build time for the target platform.

pub(crate) mod pipe;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub(crate) use epoll::{Events, Selector};
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd"
    ))] {
        mod kqueue;
        pub(crate) use kqueue::{Events, Selector};
    } else {
        compile_error!("no multiplexing facility backend for this platform");
    }
}

/// Maximum number of ready descriptors decoded per wait call. Bounds the
/// size of the reusable event buffer, not the number of registrations.
pub(crate) const MAX_EVENTS_PER_WAIT: usize = 512;

/// Creates an [io::Error] with a message prefixed to the `errno` value.
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        ::std::io::Error::new(errno.kind(), format!("{prefix}: {errno}"))
    }};
}

pub(crate) use errno;
