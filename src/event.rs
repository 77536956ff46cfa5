//! Typed notifications published by handles and requests.
//!
//! Each asynchronous outcome has its own type so that subscribers register for
//! exactly the outcomes they care about:
//!
//! ```ignore
//! stream.on(|event: &DataEvent, _stream: &TcpHandle| {
//!     println!("received {} bytes", event.length);
//! });
//! ```

use crate::error::{self, Error};

/// Marker for values that can travel through an [`Emitter`](crate::Emitter).
pub trait Event: 'static {}

/// An outgoing connection was established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectEvent;

/// The peer closed its write side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndEvent;

/// An incoming connection is ready to be accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenEvent;

/// The outgoing half-close completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownEvent;

/// A queued write fully completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteEvent;

/// The handle was closed and its descriptor released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseEvent;

/// Bytes received from the peer.
///
/// `data` is the buffer handed out by the loop's allocator, shrunk to the
/// number of bytes actually read, so `data.len() == length` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    pub data: Box<[u8]>,
    pub length: usize,
}

impl DataEvent {
    pub(crate) fn new(mut buffer: Vec<u8>, length: usize) -> Self {
        buffer.truncate(length);

        Self {
            data: buffer.into_boxed_slice(),
            length,
        }
    }
}

/// The operation that triggered this event failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEvent {
    code: i32,
}

impl ErrorEvent {
    pub(crate) fn new(code: i32) -> Self {
        Self { code }
    }

    /// Native result code, a negated `errno` or [`EOF`](crate::error::EOF).
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Symbolic name of the code.
    pub fn name(&self) -> &'static str {
        error::name(self.code)
    }

    /// Human readable description of the failure.
    pub fn what(&self) -> String {
        error::describe(self.code)
    }
}

impl From<ErrorEvent> for Error {
    fn from(event: ErrorEvent) -> Self {
        Error::from_code(event.code)
    }
}

impl Event for ConnectEvent {}
impl Event for EndEvent {}
impl Event for ListenEvent {}
impl Event for ShutdownEvent {}
impl Event for WriteEvent {}
impl Event for CloseEvent {}
impl Event for DataEvent {}
impl Event for ErrorEvent {}
