//! Transient operations issued on behalf of a stream.
//!
//! A request owns whatever must outlive the native call (the bytes of an
//! owned write, for instance) and keeps itself alive through the completion
//! callback it hands to the loop. When the loop reports the outcome, the
//! request publishes either its completion event or an [`ErrorEvent`] and is
//! then released.

use crate::emitter::Emitter;
use crate::event::{ConnectEvent, ErrorEvent, Event, ShutdownEvent, WriteEvent};
use crate::handle::Native;
use crate::reactor::core::{RawBuf, StatusCallback};
use crate::stream::StreamHandle;

use libc::EBADF;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;

pub(crate) trait Request: Sized + 'static {
    fn emitter(&self) -> &Emitter<Self>;

    fn publish<E: Event>(&self, event: E) {
        self.emitter().publish(event, self);
    }

    /// Publishes `E` on success or an [`ErrorEvent`] carrying `status`.
    fn complete<E: Event + Default>(&self, status: i32) {
        if status < 0 {
            self.publish(ErrorEvent::new(status));
        } else {
            self.publish(E::default());
        }
    }

    /// Callback handed to the loop; holds the request until it fires.
    fn completion<E: Event + Default>(self: &Rc<Self>) -> StatusCallback {
        let request = self.clone();
        Box::new(move |status| request.complete::<E>(status))
    }

    /// Publishes a synchronous failure of the native call.
    fn check(&self, result: i32) {
        if result < 0 {
            self.publish(ErrorEvent::new(result));
        }
    }
}

/// Half-close of a stream's write side.
pub(crate) struct ShutdownReq {
    emitter: Emitter<ShutdownReq>,
}

impl Request for ShutdownReq {
    fn emitter(&self) -> &Emitter<Self> {
        &self.emitter
    }
}

impl ShutdownReq {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            emitter: Emitter::new(),
        })
    }

    pub(crate) fn shutdown<T: Native>(self: &Rc<Self>, handle: &StreamHandle<T>) {
        let Some(token) = handle.token() else {
            return self.publish(ErrorEvent::new(-EBADF));
        };

        let callback = self.completion::<ShutdownEvent>();
        self.check(handle.event_loop().shutdown(token, callback));
    }
}

/// Outgoing connection attempt.
pub(crate) struct ConnectReq {
    emitter: Emitter<ConnectReq>,
}

impl Request for ConnectReq {
    fn emitter(&self) -> &Emitter<Self> {
        &self.emitter
    }
}

impl ConnectReq {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            emitter: Emitter::new(),
        })
    }

    pub(crate) fn connect<T: Native>(self: &Rc<Self>, handle: &StreamHandle<T>, address: &SocketAddr) {
        let Some(token) = handle.token() else {
            return self.publish(ErrorEvent::new(-EBADF));
        };

        let callback = self.completion::<ConnectEvent>();
        self.check(handle.event_loop().connect(token, address, callback));
    }
}

enum WriteBuf {
    Owned(Box<dyn AsRef<[u8]>>),
    Borrowed(RawBuf),
}

/// A single queued write.
pub(crate) struct WriteReq {
    emitter: Emitter<WriteReq>,
    buffer: WriteBuf,
}

impl Request for WriteReq {
    fn emitter(&self) -> &Emitter<Self> {
        &self.emitter
    }
}

impl WriteReq {
    /// Write that keeps `data` alive until it completes.
    pub(crate) fn owned(data: Box<dyn AsRef<[u8]>>) -> Rc<Self> {
        Rc::new(Self {
            emitter: Emitter::new(),
            buffer: WriteBuf::Owned(data),
        })
    }

    /// Write over memory the caller keeps alive until completion.
    ///
    /// # Safety
    /// `data` must stay valid and unmodified until the request completes.
    pub(crate) unsafe fn borrowed(data: &[u8]) -> Rc<Self> {
        Rc::new(Self {
            emitter: Emitter::new(),
            buffer: WriteBuf::Borrowed(RawBuf::new(data)),
        })
    }

    pub(crate) fn len(&self) -> usize {
        match &self.buffer {
            WriteBuf::Owned(data) => (**data).as_ref().len(),
            WriteBuf::Borrowed(buf) => buf.len(),
        }
    }

    fn bufs(&self) -> Vec<RawBuf> {
        match &self.buffer {
            WriteBuf::Owned(data) => vec![RawBuf::new((**data).as_ref())],
            WriteBuf::Borrowed(buf) => vec![*buf],
        }
    }

    pub(crate) fn write<T: Native>(self: &Rc<Self>, handle: &StreamHandle<T>) {
        self.submit(handle, None);
    }

    /// Writes and passes `send` to the peer of an IPC pipe.
    pub(crate) fn write_with<T: Native>(self: &Rc<Self>, handle: &StreamHandle<T>, send: RawFd) {
        self.submit(handle, Some(send));
    }

    fn submit<T: Native>(self: &Rc<Self>, handle: &StreamHandle<T>, send: Option<RawFd>) {
        let Some(token) = handle.token() else {
            return self.publish(ErrorEvent::new(-EBADF));
        };

        let callback = self.completion::<WriteEvent>();
        self.check(
            handle
                .event_loop()
                .write(token, self.bufs(), send, callback),
        );
    }
}
