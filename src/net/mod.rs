//! Concrete stream transports.
//!
//! - [`tcp`]: [`TcpHandle`] for TCP sockets
//! - [`pipe`]: [`PipeHandle`] for unix socket pairs and IPC channels

pub mod pipe;
pub mod tcp;

pub use pipe::PipeHandle;
pub use tcp::TcpHandle;
