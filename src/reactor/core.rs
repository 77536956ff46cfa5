use crate::builder::{Config, LoopBuilder};
use crate::error::{EOF, Error};
use crate::reactor::poller::{Interest, Poller, Readiness};
use crate::reactor::sys;

use libc::{EAGAIN, EALREADY, EBADF, EBUSY, ECANCELED, EINPROGRESS, EINVAL, ENOTCONN, EPIPE};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Identifies one native handle inside a [`Loop`]. Tokens are never reused.
pub(crate) type Token = u64;

pub(crate) type StatusCallback = Box<dyn FnOnce(i32)>;
pub(crate) type ListenCallback = Rc<RefCell<dyn FnMut(i32)>>;
pub(crate) type ReadCallback = Rc<RefCell<dyn FnMut(isize, Vec<u8>)>>;

type Deferred = Box<dyn FnOnce()>;

thread_local! {
    static DEFAULT_LOOP: RefCell<Option<Rc<Loop>>> = const { RefCell::new(None) };
}

/// A region of memory queued for writing.
///
/// The pointer must stay valid until the write that carries it completes or
/// is cancelled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBuf {
    base: *const u8,
    len: usize,
}

impl RawBuf {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            base: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

struct PendingWrite {
    bufs: Vec<RawBuf>,
    index: usize,
    offset: usize,
    send: Option<RawFd>,
    callback: StatusCallback,
}

impl PendingWrite {
    fn remaining(&self) -> Vec<libc::iovec> {
        self.bufs[self.index..]
            .iter()
            .enumerate()
            .map(|(position, buf)| {
                let skip = if position == 0 { self.offset } else { 0 };

                libc::iovec {
                    iov_base: unsafe { buf.base.add(skip) } as *mut libc::c_void,
                    iov_len: buf.len - skip,
                }
            })
            .filter(|iov| iov.iov_len > 0)
            .collect()
    }

    /// Writes as much as the descriptor accepts. Returns the syscall result.
    fn attempt(&mut self, fd: RawFd) -> isize {
        let iovs = self.remaining();

        if iovs.is_empty() && self.send.is_none() {
            return 0;
        }

        let result = match self.send {
            Some(send) => sys::write_with_fd(fd, &iovs, send),
            None => sys::write_vectored(fd, &iovs),
        };

        if result >= 0 {
            self.send = None;
        }

        result
    }

    /// Consumes `written` bytes. Returns true once every buffer went out.
    fn advance(&mut self, mut written: usize) -> bool {
        while self.index < self.bufs.len() {
            let left = self.bufs[self.index].len - self.offset;

            if written < left {
                self.offset += written;
                return false;
            }

            written -= left;
            self.index += 1;
            self.offset = 0;
        }

        true
    }
}

struct Slot {
    ipc: bool,
    fd: Option<RawFd>,
    registered: Interest,
    readable: bool,
    writable: bool,
    blocking: bool,
    listener: Option<ListenCallback>,
    parked: Option<RawFd>,
    reader: Option<ReadCallback>,
    writes: VecDeque<PendingWrite>,
    shutdown: Option<StatusCallback>,
    shutting: bool,
    connect: Option<StatusCallback>,
    received: VecDeque<RawFd>,
}

impl Slot {
    fn new(ipc: bool) -> Self {
        Self {
            ipc,
            fd: None,
            registered: Interest::NONE,
            readable: false,
            writable: false,
            blocking: false,
            listener: None,
            parked: None,
            reader: None,
            writes: VecDeque::new(),
            shutdown: None,
            shutting: false,
            connect: None,
            received: VecDeque::new(),
        }
    }

    fn interest(&self) -> Interest {
        if self.fd.is_none() {
            return Interest::NONE;
        }

        let accepting = self.listener.is_some() && self.parked.is_none();

        Interest {
            read: accepting || self.reader.is_some(),
            write: self.connect.is_some() || !self.writes.is_empty() || self.shutdown.is_some(),
        }
    }

    /// A listener counts even while a parked connection pauses its interest.
    fn active(&self) -> bool {
        !self.interest().is_none() || self.listener.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Default,
    Once,
    NoWait,
}

/// Single-threaded event loop driving every handle created on it.
///
/// Completion callbacks never run from inside the call that requested the
/// operation: they are queued and delivered, in order, by [`Loop::run`].
pub struct Loop {
    config: Config,
    poller: RefCell<Poller>,
    slots: RefCell<HashMap<Token, Slot>>,
    next_token: Cell<Token>,
    deferred: RefCell<VecDeque<Deferred>>,
    ready: RefCell<Vec<Readiness>>,
    stopped: Cell<bool>,
    running: Cell<bool>,
}

impl Loop {
    /// Creates a loop with the default configuration.
    pub fn new() -> Result<Rc<Self>, Error> {
        LoopBuilder::new().build()
    }

    pub fn builder() -> LoopBuilder {
        LoopBuilder::new()
    }

    /// Returns this thread's shared loop, creating it on first use.
    pub fn get_default() -> Result<Rc<Self>, Error> {
        DEFAULT_LOOP.with(|cell| {
            let mut current = cell.borrow_mut();

            if let Some(existing) = current.as_ref() {
                return Ok(existing.clone());
            }

            let created = LoopBuilder::new().build()?;
            *current = Some(created.clone());

            Ok(created)
        })
    }

    pub(crate) fn with_config(config: Config) -> Result<Rc<Self>, Error> {
        let poller = Poller::new(config.max_events)?;

        debug!(
            max_events = config.max_events,
            read_buffer_size = config.read_buffer_size,
            "event loop created"
        );

        Ok(Rc::new(Self {
            poller: RefCell::new(poller),
            slots: RefCell::new(HashMap::new()),
            next_token: Cell::new(1),
            deferred: RefCell::new(VecDeque::new()),
            ready: RefCell::new(Vec::with_capacity(config.max_events)),
            stopped: Cell::new(false),
            running: Cell::new(false),
            config,
        }))
    }

    /// Runs until no handle has pending work or [`stop`](Loop::stop) is
    /// called. Returns true if work remains.
    pub fn run(&self) -> bool {
        self.run_mode(RunMode::Default)
    }

    /// Waits for I/O once, dispatches it, and returns.
    pub fn run_once(&self) -> bool {
        self.run_mode(RunMode::Once)
    }

    /// Dispatches whatever is ready without waiting.
    pub fn run_nowait(&self) -> bool {
        self.run_mode(RunMode::NoWait)
    }

    /// Makes the current [`run`](Loop::run) return after this iteration.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// Returns true while some handle waits for I/O or callbacks are queued.
    pub fn alive(&self) -> bool {
        !self.deferred.borrow().is_empty()
            || self
                .slots
                .borrow()
                .values()
                .any(Slot::active)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn run_mode(&self, mode: RunMode) -> bool {
        if self.running.replace(true) {
            warn!("event loop is already running");
            return self.alive();
        }

        loop {
            self.run_deferred();

            if self.stopped.get() || !self.alive() {
                break;
            }

            let timeout = if mode == RunMode::NoWait || !self.deferred.borrow().is_empty() {
                Some(Duration::ZERO)
            } else {
                None
            };

            self.poll(timeout);
            self.run_deferred();

            if mode != RunMode::Default || self.stopped.get() {
                break;
            }
        }

        self.stopped.set(false);
        self.running.set(false);

        self.alive()
    }

    fn poll(&self, timeout: Option<Duration>) {
        let mut ready = std::mem::take(&mut *self.ready.borrow_mut());
        ready.clear();

        let count = self.poller.borrow_mut().poll(timeout, &mut ready);
        if count < 0 {
            warn!(code = count, "polling for readiness failed");
        }

        trace!(count = ready.len(), "readiness collected");

        for readiness in ready.drain(..) {
            if readiness.readable {
                self.on_readable(readiness.token);
            }

            if readiness.writable {
                self.on_writable(readiness.token);
            }
        }

        *self.ready.borrow_mut() = ready;
    }

    /// Runs the callbacks queued before this call; later ones wait for the
    /// next pass.
    fn run_deferred(&self) {
        let count = self.deferred.borrow().len();

        for _ in 0..count {
            let job = self.deferred.borrow_mut().pop_front();

            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    pub(crate) fn defer(&self, job: impl FnOnce() + 'static) {
        self.deferred.borrow_mut().push_back(Box::new(job));
    }

    pub(crate) fn register(&self, ipc: bool) -> Token {
        let token = self.next_token.get();
        self.next_token.set(token + 1);

        self.slots.borrow_mut().insert(token, Slot::new(ipc));
        trace!(token, ipc, "slot registered");

        token
    }

    /// Releases a slot: queued requests complete with `ECANCELED` and every
    /// descriptor it owns is closed.
    pub(crate) fn close(&self, token: Token) {
        let Some(slot) = self.slots.borrow_mut().remove(&token) else {
            return;
        };

        if let Some(fd) = slot.fd {
            let result = self
                .poller
                .borrow()
                .update(fd, token, slot.registered, Interest::NONE);
            if result < 0 {
                warn!(token, code = result, "failed to deregister descriptor");
            }
        }

        let Slot {
            fd,
            parked,
            received,
            reader,
            listener,
            writes,
            shutdown,
            connect,
            ..
        } = slot;

        if let Some(callback) = connect {
            self.defer(move || callback(-ECANCELED));
        }

        for write in writes {
            let callback = write.callback;
            self.defer(move || callback(-ECANCELED));
        }

        if let Some(callback) = shutdown {
            self.defer(move || callback(-ECANCELED));
        }

        for fd in fd.into_iter().chain(parked).chain(received) {
            sys::close(fd);
        }

        debug!(token, fd = ?fd, "slot closed");

        drop(reader);
        drop(listener);
    }

    /// Takes ownership of an existing descriptor.
    pub(crate) fn open(&self, token: Token, fd: RawFd) -> i32 {
        let (readable, writable) = match sys::access_mode(fd) {
            Ok(mode) => mode,
            Err(code) => return code,
        };

        self.adopt(token, fd, readable, writable)
    }

    fn adopt(&self, token: Token, fd: RawFd, readable: bool, writable: bool) -> i32 {
        let mut slots = self.slots.borrow_mut();
        let Some(slot) = slots.get_mut(&token) else {
            return -EBADF;
        };

        if slot.fd.is_some() {
            return -EBUSY;
        }

        let result = sys::set_nonblocking(fd, true);
        if result < 0 {
            return result;
        }

        sys::set_cloexec(fd);
        sys::set_nosigpipe(fd);

        slot.fd = Some(fd);
        slot.readable = readable;
        slot.writable = writable;

        trace!(token, fd, readable, writable, "descriptor adopted");

        0
    }

    fn ensure_socket(&self, token: Token, address: &SocketAddr) -> Result<RawFd, i32> {
        if let Some(fd) = self.fileno(token) {
            return Ok(fd);
        }

        let fd = sys::socket(address);
        if fd < 0 {
            return Err(fd);
        }

        let result = self.adopt(token, fd, true, true);
        if result < 0 {
            sys::close(fd);
            return Err(result);
        }

        Ok(fd)
    }

    pub(crate) fn bind(&self, token: Token, address: &SocketAddr) -> i32 {
        match self.ensure_socket(token, address) {
            Ok(fd) => sys::bind(fd, address),
            Err(code) => code,
        }
    }

    pub(crate) fn connect(&self, token: Token, address: &SocketAddr, callback: StatusCallback) -> i32 {
        if self.with_slot(token, |slot| slot.connect.is_some()) == Some(true) {
            return -EALREADY;
        }

        let fd = match self.ensure_socket(token, address) {
            Ok(fd) => fd,
            Err(code) => return code,
        };

        let status = sys::connect(fd, address);

        if status == -EINPROGRESS {
            if let Some(slot) = self.slots.borrow_mut().get_mut(&token) {
                slot.connect = Some(callback);
            }
            self.update_interest(token);
        } else {
            self.defer(move || callback(status));
        }

        0
    }

    fn complete_connect(&self, token: Token) {
        let (callback, status) = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&token) else {
                return;
            };
            let (Some(fd), Some(callback)) = (slot.fd, slot.connect.take()) else {
                return;
            };

            (callback, sys::socket_error(fd))
        };

        trace!(token, status, "connect completed");

        self.defer(move || callback(status));
        self.flush(token);
    }

    pub(crate) fn listen(&self, token: Token, backlog: i32, callback: ListenCallback) -> i32 {
        let previous = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&token) else {
                return -EBADF;
            };
            let Some(fd) = slot.fd else {
                return -EINVAL;
            };

            let result = sys::listen(fd, backlog);
            if result < 0 {
                return result;
            }

            slot.listener.replace(callback)
        };

        drop(previous);
        self.update_interest(token);

        0
    }

    fn accept_pending(&self, token: Token) {
        loop {
            let (fd, listener) = {
                let slots = self.slots.borrow();
                let Some(slot) = slots.get(&token) else {
                    return;
                };
                let (Some(fd), Some(listener), None) =
                    (slot.fd, slot.listener.clone(), slot.parked)
                else {
                    return;
                };

                (fd, listener)
            };

            let accepted = sys::accept(fd);
            if accepted == -EAGAIN {
                return;
            }

            if accepted >= 0 {
                if let Some(slot) = self.slots.borrow_mut().get_mut(&token) {
                    slot.parked = Some(accepted);
                }
                self.update_interest(token);
            }

            trace!(token, result = accepted, "incoming connection");

            if let Ok(mut listener) = listener.try_borrow_mut() {
                (*listener)(accepted.min(0));
            }

            if accepted < 0 {
                return;
            }
        }
    }

    /// Moves a pending connection (or a descriptor received over IPC) from
    /// `server` into the empty handle `client`.
    pub(crate) fn accept(&self, server: Token, client: Token) -> i32 {
        if server == client {
            return -EINVAL;
        }

        match self.with_slot(client, |slot| slot.fd.is_some()) {
            None => return -EBADF,
            Some(true) => return -EBUSY,
            Some(false) => {}
        }

        let fd = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&server) else {
                return -EBADF;
            };

            let taken = if slot.ipc {
                slot.received.pop_front()
            } else {
                slot.parked.take()
            };

            match taken {
                Some(fd) => fd,
                None => return -EAGAIN,
            }
        };

        self.update_interest(server);

        let result = self.adopt(client, fd, true, true);
        if result < 0 {
            sys::close(fd);
        }

        result
    }

    pub(crate) fn read_start(&self, token: Token, callback: ReadCallback) -> i32 {
        let previous = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&token) else {
                return -EBADF;
            };

            if slot.fd.is_none() || !slot.readable {
                return -ENOTCONN;
            }

            slot.reader.replace(callback)
        };

        drop(previous);
        self.update_interest(token);

        0
    }

    pub(crate) fn read_stop(&self, token: Token) -> i32 {
        let previous = self
            .slots
            .borrow_mut()
            .get_mut(&token)
            .and_then(|slot| slot.reader.take());

        drop(previous);
        self.update_interest(token);

        0
    }

    fn read_ready(&self, token: Token) {
        let (limit, size) = match self.with_slot(token, |slot| slot.blocking) {
            Some(true) => (1, self.config.read_buffer_size),
            Some(false) => (self.config.reads_per_tick, self.config.read_buffer_size),
            None => return,
        };

        for _ in 0..limit {
            let (fd, ipc, reader) = {
                let slots = self.slots.borrow();
                let Some(slot) = slots.get(&token) else {
                    return;
                };
                let (Some(fd), Some(reader)) = (slot.fd, slot.reader.clone()) else {
                    return;
                };

                (fd, slot.ipc, reader)
            };

            let mut buffer = vec![0u8; size];
            let mut received = Vec::new();

            let result = if ipc {
                sys::read_with_fds(fd, &mut buffer, &mut received)
            } else {
                sys::read(fd, &mut buffer)
            };

            if result == -(EAGAIN as isize) {
                return;
            }

            let result = if result == 0 { EOF as isize } else { result };

            {
                let mut slots = self.slots.borrow_mut();
                if let Some(slot) = slots.get_mut(&token) {
                    slot.received.extend(received.drain(..));

                    if result < 0 {
                        if result == EOF as isize {
                            slot.readable = false;
                        }
                        slot.reader = None;
                    }
                }
            }

            for fd in received {
                sys::close(fd);
            }

            if result < 0 {
                self.update_interest(token);
            }

            if let Ok(mut callback) = reader.try_borrow_mut() {
                (*callback)(result, buffer);
            }

            if result < 0 || (result as usize) < size {
                return;
            }

            let still_reading = self.with_slot(token, |slot| {
                slot.reader
                    .as_ref()
                    .is_some_and(|current| Rc::ptr_eq(current, &reader))
            });

            if still_reading != Some(true) {
                return;
            }
        }
    }

    /// Queues `bufs` behind any earlier writes, optionally passing `send`
    /// over an IPC channel with the first byte.
    pub(crate) fn write(
        &self,
        token: Token,
        bufs: Vec<RawBuf>,
        send: Option<RawFd>,
        callback: StatusCallback,
    ) -> i32 {
        let flush_now = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&token) else {
                return -EBADF;
            };

            if slot.fd.is_none() {
                return -EBADF;
            }

            if send.is_some() && !slot.ipc {
                return -EINVAL;
            }

            if !slot.writable || slot.shutting {
                return -EPIPE;
            }

            slot.writes.push_back(PendingWrite {
                bufs,
                index: 0,
                offset: 0,
                send,
                callback,
            });

            slot.writes.len() == 1 && slot.connect.is_none()
        };

        if flush_now {
            self.flush(token);
        } else {
            self.update_interest(token);
        }

        0
    }

    /// Writes immediately without queueing. Returns the byte count or a
    /// negative code; `-EAGAIN` when earlier writes are still queued.
    pub(crate) fn try_write(&self, token: Token, bufs: &[&[u8]]) -> isize {
        let fd = {
            let slots = self.slots.borrow();
            let Some(slot) = slots.get(&token) else {
                return -(EBADF as isize);
            };
            let Some(fd) = slot.fd else {
                return -(EBADF as isize);
            };

            if !slot.writable || slot.shutting {
                return -(EPIPE as isize);
            }

            if !slot.writes.is_empty() || slot.connect.is_some() {
                return -(EAGAIN as isize);
            }

            fd
        };

        let iovs: Vec<libc::iovec> = bufs
            .iter()
            .filter(|buf| !buf.is_empty())
            .map(|buf| libc::iovec {
                iov_base: buf.as_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            })
            .collect();

        if iovs.is_empty() {
            return 0;
        }

        sys::write_vectored(fd, &iovs)
    }

    /// Half-closes the write side once every queued write went out.
    pub(crate) fn shutdown(&self, token: Token, callback: StatusCallback) -> i32 {
        {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&token) else {
                return -EBADF;
            };

            if slot.fd.is_none() || !slot.writable || slot.shutting {
                return -ENOTCONN;
            }

            slot.shutting = true;
            slot.shutdown = Some(callback);
        }

        self.update_interest(token);

        0
    }

    fn flush(&self, token: Token) {
        let mut finished: Vec<(StatusCallback, i32)> = Vec::new();

        {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&token) else {
                return;
            };
            let Some(fd) = slot.fd else {
                return;
            };

            if slot.connect.is_some() {
                return;
            }

            while let Some(write) = slot.writes.front_mut() {
                let result = write.attempt(fd);

                if result == -(EAGAIN as isize) {
                    break;
                }

                if result < 0 {
                    for write in slot.writes.drain(..) {
                        finished.push((write.callback, result as i32));
                    }
                    break;
                }

                if !write.advance(result as usize) {
                    break;
                }

                if let Some(write) = slot.writes.pop_front() {
                    finished.push((write.callback, 0));
                }
            }

            if slot.writes.is_empty() {
                if let Some(callback) = slot.shutdown.take() {
                    let status = sys::shutdown_write(fd);
                    slot.writable = false;
                    finished.push((callback, status));
                }
            }
        }

        self.update_interest(token);

        for (callback, status) in finished {
            self.defer(move || callback(status));
        }
    }

    fn on_readable(&self, token: Token) {
        let listening = self.with_slot(token, |slot| slot.listener.is_some());

        match listening {
            Some(true) => self.accept_pending(token),
            Some(false) => self.read_ready(token),
            None => {}
        }
    }

    fn on_writable(&self, token: Token) {
        match self.with_slot(token, |slot| slot.connect.is_some()) {
            Some(true) => self.complete_connect(token),
            Some(false) => self.flush(token),
            None => {}
        }
    }

    fn update_interest(&self, token: Token) {
        let mut slots = self.slots.borrow_mut();
        let Some(slot) = slots.get_mut(&token) else {
            return;
        };
        let Some(fd) = slot.fd else {
            return;
        };

        let next = slot.interest();
        if next == slot.registered {
            return;
        }

        let result = self
            .poller
            .borrow()
            .update(fd, token, slot.registered, next);

        if result < 0 {
            warn!(token, fd, code = result, "failed to update readiness interest");
            return;
        }

        slot.registered = next;
    }

    fn with_slot<R>(&self, token: Token, f: impl FnOnce(&Slot) -> R) -> Option<R> {
        self.slots.borrow().get(&token).map(f)
    }

    pub(crate) fn set_blocking(&self, token: Token, enable: bool) -> i32 {
        let mut slots = self.slots.borrow_mut();
        let Some(slot) = slots.get_mut(&token) else {
            return -EBADF;
        };
        let Some(fd) = slot.fd else {
            return -EBADF;
        };

        let result = sys::set_nonblocking(fd, !enable);
        if result == 0 {
            slot.blocking = enable;
        }

        result
    }

    pub(crate) fn is_readable(&self, token: Token) -> bool {
        self.with_slot(token, |slot| slot.fd.is_some() && slot.readable) == Some(true)
    }

    pub(crate) fn is_writable(&self, token: Token) -> bool {
        self.with_slot(token, |slot| slot.fd.is_some() && slot.writable && !slot.shutting)
            == Some(true)
    }

    pub(crate) fn is_active(&self, token: Token) -> bool {
        self.with_slot(token, Slot::active) == Some(true)
    }

    pub(crate) fn fileno(&self, token: Token) -> Option<RawFd> {
        self.with_slot(token, |slot| slot.fd).flatten()
    }

    /// Descriptors received over IPC and not yet accepted.
    pub(crate) fn pending_count(&self, token: Token) -> usize {
        self.with_slot(token, |slot| slot.received.len())
            .unwrap_or(0)
    }

    pub(crate) fn local_address(&self, token: Token) -> Option<SocketAddr> {
        self.fileno(token).and_then(sys::local_address)
    }

    pub(crate) fn peer_address(&self, token: Token) -> Option<SocketAddr> {
        self.fileno(token).and_then(sys::peer_address)
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        let slots = std::mem::take(self.slots.get_mut());

        for slot in slots.values() {
            for fd in slot.fd.iter().chain(slot.parked.iter()).chain(slot.received.iter()) {
                sys::close(*fd);
            }
        }

        debug!(leaked = slots.len(), "event loop dropped");
    }
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("config", &self.config)
            .field("slots", &self.slots.borrow().len())
            .field("deferred", &self.deferred.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_test::traced_test;

    fn pending(bufs: &[&'static [u8]]) -> PendingWrite {
        PendingWrite {
            bufs: bufs.iter().map(|buf| RawBuf::new(buf)).collect(),
            index: 0,
            offset: 0,
            send: None,
            callback: Box::new(|_| {}),
        }
    }

    #[test]
    fn partial_writes_resume_mid_buffer() {
        let mut write = pending(&[b"hello", b"world"]);

        assert!(!write.advance(3));
        let iovs = write.remaining();
        assert_eq!(iovs.len(), 2);
        assert_eq!(iovs[0].iov_len, 2);

        assert!(!write.advance(4));
        assert_eq!(write.remaining()[0].iov_len, 4);

        assert!(write.advance(4));
        assert!(write.remaining().is_empty());
    }

    #[test]
    fn empty_buffers_complete_without_syscall() {
        let mut write = pending(&[b""]);

        assert_eq!(write.attempt(-1), 0);
        assert!(write.advance(0));
    }

    #[test]
    fn fresh_loop_is_not_alive() {
        let event_loop = Loop::new().unwrap();

        assert!(!event_loop.alive());
        assert!(!event_loop.run());
    }

    #[test]
    fn deferred_jobs_run_in_order() {
        let event_loop = Loop::new().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));

        for index in 0..3 {
            let order = order.clone();
            event_loop.defer(move || order.borrow_mut().push(index));
        }

        assert!(event_loop.alive());
        event_loop.run();

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[traced_test]
    #[test]
    fn closing_a_slot_cancels_its_shutdown() {
        let event_loop = Loop::new().unwrap();
        let (left, right) = sys::socketpair().unwrap();
        let token = event_loop.register(false);
        let status = Rc::new(Cell::new(0));

        assert_eq!(event_loop.open(token, left), 0);

        let seen = status.clone();
        assert_eq!(event_loop.shutdown(token, Box::new(move |code| seen.set(code))), 0);
        event_loop.close(token);
        event_loop.run();

        assert_eq!(status.get(), -ECANCELED);
        assert!(logs_contain("slot closed"));
        sys::close(right);
    }

    #[test]
    fn parked_connection_keeps_listener_alive() {
        let event_loop = Loop::new().unwrap();
        let server = event_loop.register(false);
        let address: SocketAddr = "127.0.0.1:0".parse().unwrap();

        assert_eq!(event_loop.bind(server, &address), 0);
        let bound = event_loop.local_address(server).unwrap();

        let announced = Rc::new(Cell::new(0));
        let seen = announced.clone();
        let callback: ListenCallback = Rc::new(RefCell::new(move |status: i32| {
            assert_eq!(status, 0);
            seen.set(seen.get() + 1);
        }));
        assert_eq!(event_loop.listen(server, 16, callback), 0);

        let _peer = std::net::TcpStream::connect(bound).unwrap();
        event_loop.run_once();

        assert_eq!(announced.get(), 1);
        assert!(event_loop.alive());
        assert!(event_loop.is_active(server));

        let client = event_loop.register(false);
        assert_eq!(event_loop.accept(server, client), 0);
        assert!(event_loop.fileno(client).is_some());

        event_loop.close(client);
        event_loop.close(server);
        assert!(!event_loop.alive());
    }

    #[test]
    fn get_default_is_shared_per_thread() {
        let first = Loop::get_default().unwrap();
        let second = Loop::get_default().unwrap();

        assert!(Rc::ptr_eq(&first, &second));
    }
}
