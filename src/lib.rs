//! Per-direction readiness-event poller.
//!
//! A scheduler that multiplexes many lightweight tasks over a few OS threads
//! cannot afford to park a whole thread inside a blocking `read` or `write`.
//! Instead, the I/O call is issued in non-blocking mode, and when it would
//! block, the task is suspended until the OS reports that the file descriptor
//! is ready. This crate implements the piece in the middle: a [`Poller`] that
//! owns one multiplexing context (`epoll(7)` on Linux, `kqueue(2)` on macOS
//! and the BSDs) dedicated to a single readiness direction, and tells the
//! scheduler which descriptors became ready.
//!
//! Interests are armed *one-shot*: the facility disarms an interest after it
//! fires once, so a descriptor is reported at most once per registration and
//! must be re-registered for the next wait. This keeps the registration
//! protocol an explicit hand-off between poller and scheduler rather than a
//! persistent subscription both sides would have to keep in sync.
//!
//! One designated thread drives [`Poller::wait`] in a loop; any other thread
//! may register, deregister, or wake concurrently. Wakeups ride on a private
//! self-pipe owned by the poller, so interrupting a blocked wait needs no
//! signals or secondary notification channel beyond the facility itself.

#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unused_must_use)]

pub mod poller;
pub use poller::{Direction, Poller};

pub(crate) mod sys;
