//! Behaviour shared by every loop-bound handle: lifetime, closing and event
//! subscription.

use crate::emitter::Connection;
use crate::event::{CloseEvent, ErrorEvent, Event};
use crate::reactor::core::{Loop, Token};
use crate::stream::StreamHandle;

use libc::EBADF;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use tracing::trace;

/// Kind of native object behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    Tcp,
    Pipe,
}

/// Native flavour a [`StreamHandle`] wraps.
pub trait Native: 'static {
    const TYPE: HandleType;
}

/// TCP sockets.
#[derive(Debug)]
pub struct Tcp;

/// Unix domain sockets and anonymous pipes.
#[derive(Debug)]
pub struct Pipe;

impl Native for Tcp {
    const TYPE: HandleType = HandleType::Tcp;
}

impl Native for Pipe {
    const TYPE: HandleType = HandleType::Pipe;
}

impl<T: Native> StreamHandle<T> {
    /// Takes ownership of an already open descriptor.
    ///
    /// Publishes an [`ErrorEvent`] and returns false on failure.
    pub fn open(&self, fd: RawFd) -> bool {
        self.invoke(|event_loop, token| event_loop.open(token, fd))
    }

    /// Releases the native handle.
    ///
    /// Pending writes, shutdowns and connects complete with `ECANCELED`, then
    /// a [`CloseEvent`] is published. Closing twice is a no-op.
    pub fn close(&self) {
        let Some(token) = self.token.take() else {
            return;
        };

        self.event_loop.close(token);
        trace!(token, kind = ?T::TYPE, "handle closing");

        if let Some(this) = self.shared() {
            self.event_loop.defer(move || this.publish(CloseEvent));
        }
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn closing(&self) -> bool {
        self.token.get().is_none()
    }

    /// Returns true while the handle listens, reads or has requests queued.
    pub fn active(&self) -> bool {
        self.token
            .get()
            .is_some_and(|token| self.event_loop.is_active(token))
    }

    /// Underlying descriptor, if one is open.
    pub fn fileno(&self) -> Option<RawFd> {
        self.token
            .get()
            .and_then(|token| self.event_loop.fileno(token))
    }

    pub fn handle_type(&self) -> HandleType {
        T::TYPE
    }

    /// Loop this handle runs on.
    pub fn event_loop(&self) -> &Rc<Loop> {
        &self.event_loop
    }

    /// Subscribes to every event of type `E` published by this handle.
    pub fn on<E, F>(&self, listener: F) -> Connection<E>
    where
        E: Event,
        F: FnMut(&E, &Self) + 'static,
    {
        self.emitter.on(listener)
    }

    /// Subscribes to the next event of type `E` only.
    pub fn once<E, F>(&self, listener: F) -> Connection<E>
    where
        E: Event,
        F: FnOnce(&E, &Self) + 'static,
    {
        self.emitter.once(listener)
    }

    pub fn erase<E: Event>(&self, connection: Connection<E>) {
        self.emitter.erase(connection);
    }

    pub fn clear<E: Event>(&self) {
        self.emitter.clear::<E>();
    }

    pub fn clear_all(&self) {
        self.emitter.clear_all();
    }

    pub fn has_listeners<E: Event>(&self) -> bool {
        !self.emitter.is_empty::<E>()
    }

    pub(crate) fn publish<E: Event>(&self, event: E) {
        self.emitter.publish(event, self);
    }

    pub(crate) fn token(&self) -> Option<Token> {
        self.token.get()
    }

    /// Strong reference to this handle, absent only while it is dropped.
    pub(crate) fn shared(&self) -> Option<Rc<Self>> {
        self.this.upgrade()
    }

    /// Runs a native primitive, publishing an [`ErrorEvent`] when it fails.
    pub(crate) fn invoke(&self, f: impl FnOnce(&Loop, Token) -> i32) -> bool {
        let result = match self.token.get() {
            Some(token) => f(&self.event_loop, token),
            None => -EBADF,
        };

        if result < 0 {
            self.publish(ErrorEvent::new(result));
            return false;
        }

        true
    }
}

impl<T: Native> Drop for StreamHandle<T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.event_loop.close(token);
        }
    }
}
