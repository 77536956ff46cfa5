//! Event-driven duplex streams over a single-threaded I/O loop.
//!
//! A [`Loop`] polls sockets for readiness and runs completion callbacks. On top
//! of it, a [`StreamHandle`] turns every asynchronous outcome into a typed
//! event published to the handle's subscribers:
//!
//! - **Events**: [`ConnectEvent`], [`DataEvent`], [`EndEvent`], [`ListenEvent`],
//!   [`ShutdownEvent`], [`WriteEvent`], [`ErrorEvent`], [`CloseEvent`]
//! - **Emitter**: per-object typed publish/subscribe bus
//! - **Requests**: one-shot connect, shutdown and write operations that live
//!   until their completion event fires
//! - **Streams**: listen, accept, read, write, shutdown and introspection,
//!   generic over TCP sockets ([`TcpHandle`]) and unix pipes ([`PipeHandle`])
//! - **LoopBuilder**: fluent configuration of a [`Loop`]

mod builder;
mod emitter;
mod error;
mod event;
mod handle;
mod net;
mod reactor;
mod request;
mod stream;

pub use builder::{Config, LoopBuilder};
pub use emitter::{Connection, Emitter};
pub use error::{EOF, Error};
pub use event::{
    CloseEvent, ConnectEvent, DataEvent, EndEvent, ErrorEvent, Event, ListenEvent, ShutdownEvent,
    WriteEvent,
};
pub use handle::{HandleType, Native, Pipe, Tcp};
pub use net::{PipeHandle, TcpHandle};
pub use reactor::core::Loop;
pub use stream::{DEFAULT_BACKLOG, StreamHandle};
