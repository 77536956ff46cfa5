//! Duplex stream operations generic over the native descriptor type.
//!
//! Every operation returns immediately. Outcomes arrive later as events on the
//! stream, published while the owning [`Loop`] runs:
//!
//! ```ignore
//! let server = TcpHandle::init(&event_loop);
//! server.bind("127.0.0.1:0".parse()?);
//!
//! server.on(|_: &ListenEvent, server: &TcpHandle| {
//!     let client = TcpHandle::init(server.event_loop());
//!     server.accept(&client);
//!     client.on(|data: &DataEvent, client: &TcpHandle| client.write(data.data.clone()));
//!     client.read();
//! });
//!
//! server.listen();
//! event_loop.run();
//! ```
//!
//! Failures never surface as return values: they are published as
//! [`ErrorEvent`]s, and dropped silently when nobody listens for them.

use crate::emitter::Emitter;
use crate::event::{DataEvent, EndEvent, ErrorEvent, Event, ListenEvent, ShutdownEvent, WriteEvent};
use crate::handle::Native;
use crate::reactor::core::{Loop, Token};
use crate::request::{Request, ShutdownReq, WriteReq};

use libc::{EBADF, EINVAL};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// Pending-connection queue length used by [`StreamHandle::listen`].
pub const DEFAULT_BACKLOG: i32 = 128;

/// A loop-bound duplex stream over a native descriptor of kind `T`.
pub struct StreamHandle<T: Native> {
    pub(crate) event_loop: Rc<Loop>,
    pub(crate) token: Cell<Option<Token>>,
    pub(crate) emitter: Emitter<StreamHandle<T>>,
    pub(crate) this: Weak<StreamHandle<T>>,
    ipc: bool,
    _native: PhantomData<T>,
}

impl<T: Native> StreamHandle<T> {
    /// Creates a handle on `event_loop` without a descriptor.
    pub fn init(event_loop: &Rc<Loop>) -> Rc<Self> {
        Self::with_ipc(event_loop, false)
    }

    pub(crate) fn with_ipc(event_loop: &Rc<Loop>, ipc: bool) -> Rc<Self> {
        let token = event_loop.register(ipc);

        Rc::new_cyclic(|this| Self {
            event_loop: event_loop.clone(),
            token: Cell::new(Some(token)),
            emitter: Emitter::new(),
            this: this.clone(),
            ipc,
            _native: PhantomData,
        })
    }

    pub(crate) fn is_ipc(&self) -> bool {
        self.ipc
    }

    /// Half-closes the outgoing direction once every queued write went out.
    ///
    /// Publishes [`ShutdownEvent`] or [`ErrorEvent`].
    pub fn shutdown(&self) {
        let request = ShutdownReq::new();
        self.forward::<ShutdownEvent, _>(&request);
        request.shutdown(self);
    }

    /// Starts accepting connections with the default backlog.
    pub fn listen(&self) {
        self.listen_with_backlog(DEFAULT_BACKLOG);
    }

    /// Starts accepting connections. Each incoming connection publishes a
    /// [`ListenEvent`]; failures publish an [`ErrorEvent`].
    ///
    /// A listening stream stays alive until it is closed, even once the
    /// caller dropped every reference to it.
    pub fn listen_with_backlog(&self, backlog: i32) {
        let Some(handle) = self.shared() else {
            return;
        };

        let callback = Rc::new(RefCell::new(move |status: i32| {
            if status == 0 {
                handle.publish(ListenEvent);
            } else {
                handle.publish(ErrorEvent::new(status));
            }
        }));

        self.invoke(|event_loop, token| event_loop.listen(token, backlog, callback));
    }

    /// Moves the connection announced by the last [`ListenEvent`] into
    /// `peer`, which must be an empty handle on the same loop.
    ///
    /// Publishes an [`ErrorEvent`] on failure and nothing on success.
    pub fn accept<S: Native>(&self, peer: &StreamHandle<S>) {
        if !Rc::ptr_eq(&self.event_loop, &peer.event_loop) {
            self.publish(ErrorEvent::new(-EINVAL));
            return;
        }

        let Some(client) = peer.token() else {
            self.publish(ErrorEvent::new(-EBADF));
            return;
        };

        self.invoke(|event_loop, token| event_loop.accept(token, client));
    }

    /// Starts delivering incoming bytes as [`DataEvent`]s.
    ///
    /// End of stream publishes [`EndEvent`] and a failure publishes
    /// [`ErrorEvent`]; either ends the read session. Until then the session
    /// keeps the stream alive, so dropping the last caller reference does not
    /// close it.
    pub fn read(&self) {
        let Some(handle) = self.shared() else {
            return;
        };

        let callback = Rc::new(RefCell::new(move |nread: isize, buffer: Vec<u8>| {
            if nread == crate::error::EOF as isize {
                handle.publish(EndEvent);
            } else if nread > 0 {
                handle.publish(DataEvent::new(buffer, nread as usize));
            } else if nread < 0 {
                handle.publish(ErrorEvent::new(nread as i32));
            }
        }));

        self.invoke(|event_loop, token| event_loop.read_start(token, callback));
    }

    /// Stops delivering incoming bytes and releases the read session's
    /// reference to the stream. Stopping twice is fine.
    pub fn stop(&self) {
        if let Some(token) = self.token() {
            self.event_loop.read_stop(token);
        }
    }

    /// Queues `data` for writing and drops it once the write completes.
    ///
    /// Publishes [`WriteEvent`] or [`ErrorEvent`].
    pub fn write<B>(&self, data: B)
    where
        B: AsRef<[u8]> + 'static,
    {
        let request = WriteReq::owned(Box::new(data));
        self.forward::<WriteEvent, _>(&request);
        request.write(self);
    }

    /// Queues `data` for writing without taking ownership.
    ///
    /// # Safety
    /// `data` must stay valid and unmodified until the [`WriteEvent`] or
    /// [`ErrorEvent`] of this write was published.
    pub unsafe fn write_borrowed(&self, data: &[u8]) {
        let request = unsafe { WriteReq::borrowed(data) };
        self.forward::<WriteEvent, _>(&request);
        request.write(self);
    }

    /// Queues `data` and passes `send`'s descriptor to the peer. Only IPC
    /// pipes can carry descriptors.
    pub fn write_handle<S, B>(&self, send: &StreamHandle<S>, data: B)
    where
        S: Native,
        B: AsRef<[u8]> + 'static,
    {
        let request = WriteReq::owned(Box::new(data));
        self.send_with(request, send);
    }

    /// Borrowing form of [`write_handle`](Self::write_handle).
    ///
    /// # Safety
    /// `data` must stay valid and unmodified until the [`WriteEvent`] or
    /// [`ErrorEvent`] of this write was published.
    pub unsafe fn write_handle_borrowed<S: Native>(&self, send: &StreamHandle<S>, data: &[u8]) {
        let request = unsafe { WriteReq::borrowed(data) };
        self.send_with(request, send);
    }

    fn send_with<S: Native>(&self, request: Rc<WriteReq>, send: &StreamHandle<S>) {
        self.forward::<WriteEvent, _>(&request);

        // A descriptor travels with at least one byte of payload.
        if request.len() == 0 {
            return request.publish(ErrorEvent::new(-EINVAL));
        }

        match send.fileno() {
            Some(fd) => request.write_with(self, fd),
            None => request.publish(ErrorEvent::new(-EBADF)),
        }
    }

    /// Writes as much of `data` as possible right now, without queueing.
    ///
    /// Returns the number of bytes written. A failure publishes an
    /// [`ErrorEvent`] and returns 0.
    pub fn try_write(&self, data: &[u8]) -> usize {
        let result = match self.token() {
            Some(token) => self.event_loop.try_write(token, &[data]),
            None => -(EBADF as isize),
        };

        if result < 0 {
            self.publish(ErrorEvent::new(result as i32));
            return 0;
        }

        result as usize
    }

    /// Returns true if the stream can still be read from.
    pub fn readable(&self) -> bool {
        self.token()
            .is_some_and(|token| self.event_loop.is_readable(token))
    }

    /// Returns true if the stream accepts writes.
    pub fn writable(&self) -> bool {
        self.token()
            .is_some_and(|token| self.event_loop.is_writable(token))
    }

    /// Switches the descriptor between blocking and non-blocking writes.
    /// Completions are still reported through events.
    pub fn blocking(&self, enable: bool) -> bool {
        self.invoke(|event_loop, token| event_loop.set_blocking(token, enable))
    }

    /// Republishes the outcome of `request` on this stream.
    pub(crate) fn forward<E, R>(&self, request: &Rc<R>)
    where
        E: Event + Default,
        R: Request,
    {
        let Some(handle) = self.shared() else {
            return;
        };

        let on_error = handle.clone();
        request
            .emitter()
            .once(move |event: &ErrorEvent, _| on_error.publish(*event));
        request
            .emitter()
            .once(move |_: &E, _| handle.publish(E::default()));
    }
}

impl<T: Native> fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("type", &T::TYPE)
            .field("token", &self.token.get())
            .field("ipc", &self.ipc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::event::{ErrorEvent, WriteEvent};
    use crate::net::TcpHandle;
    use crate::reactor::core::Loop;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn record_errors(handle: &TcpHandle) -> Rc<RefCell<Vec<i32>>> {
        let codes = Rc::new(RefCell::new(Vec::new()));
        let seen = codes.clone();
        handle.on(move |event: &ErrorEvent, _| seen.borrow_mut().push(event.code()));
        codes
    }

    #[test]
    fn unconnected_stream_has_no_direction() {
        let event_loop = Loop::new().unwrap();
        let stream = TcpHandle::init(&event_loop);

        assert!(!stream.readable());
        assert!(!stream.writable());
        assert!(stream.fileno().is_none());
    }

    #[test]
    fn write_without_descriptor_publishes_ebadf() {
        let event_loop = Loop::new().unwrap();
        let stream = TcpHandle::init(&event_loop);
        let codes = record_errors(&stream);

        stream.on(|_: &WriteEvent, _| panic!("write cannot succeed"));
        stream.write(b"data".to_vec());
        event_loop.run();

        assert_eq!(*codes.borrow(), vec![-libc::EBADF]);
    }

    #[test]
    fn operations_after_close_publish_ebadf() {
        let event_loop = Loop::new().unwrap();
        let stream = TcpHandle::init(&event_loop);
        let codes = record_errors(&stream);

        stream.close();
        stream.read();
        stream.listen();
        assert_eq!(stream.try_write(b"x"), 0);

        assert_eq!(*codes.borrow(), vec![-libc::EBADF; 3]);
        assert!(stream.closing());
    }

    #[test]
    fn stop_without_read_is_silent() {
        let event_loop = Loop::new().unwrap();
        let stream = TcpHandle::init(&event_loop);
        let codes = record_errors(&stream);

        stream.stop();
        stream.stop();

        assert!(codes.borrow().is_empty());
    }

    #[test]
    fn read_on_unconnected_stream_fails() {
        let event_loop = Loop::new().unwrap();
        let stream = TcpHandle::init(&event_loop);
        let codes = record_errors(&stream);

        stream.read();

        assert_eq!(*codes.borrow(), vec![-libc::ENOTCONN]);
    }

    #[test]
    fn shutdown_on_unconnected_stream_fails() {
        let event_loop = Loop::new().unwrap();
        let stream = TcpHandle::init(&event_loop);
        let codes = record_errors(&stream);

        stream.shutdown();

        assert_eq!(*codes.borrow(), vec![-libc::ENOTCONN]);
    }
}
