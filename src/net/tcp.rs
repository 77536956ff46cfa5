use crate::event::ConnectEvent;
use crate::handle::Tcp;
use crate::request::ConnectReq;
use crate::stream::StreamHandle;

use std::net::SocketAddr;

/// TCP stream handle.
pub type TcpHandle = StreamHandle<Tcp>;

impl StreamHandle<Tcp> {
    /// Binds to `address`, creating the socket if needed.
    ///
    /// Publishes an [`ErrorEvent`](crate::event::ErrorEvent) and returns false
    /// on failure.
    pub fn bind(&self, address: SocketAddr) -> bool {
        self.invoke(|event_loop, token| event_loop.bind(token, &address))
    }

    /// Connects to `address`. Publishes [`ConnectEvent`] once established.
    pub fn connect(&self, address: SocketAddr) {
        let request = ConnectReq::new();
        self.forward::<ConnectEvent, _>(&request);
        request.connect(self, &address);
    }

    /// Local address of the socket.
    pub fn sock(&self) -> Option<SocketAddr> {
        self.token()
            .and_then(|token| self.event_loop.local_address(token))
    }

    /// Address of the connected peer.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.token()
            .and_then(|token| self.event_loop.peer_address(token))
    }
}
