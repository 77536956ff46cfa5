//! Callback-driven I/O engine.
//!
//! - [`core`]: the [`Loop`](core::Loop), its handle slots and request queues
//! - [`poller`]: epoll/kqueue readiness backends
//! - [`sys`]: raw syscall wrappers returning negated `errno` codes

pub(crate) mod core;
pub(crate) mod poller;
pub(crate) mod sys;
