use duplex::{
    ConnectEvent, DataEvent, EndEvent, ErrorEvent, ListenEvent, Loop, ShutdownEvent, TcpHandle,
    WriteEvent,
};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::rc::Rc;
use std::thread;
use tracing_test::traced_test;

fn bound_server(event_loop: &Rc<Loop>) -> (Rc<TcpHandle>, SocketAddr) {
    let server = TcpHandle::init(event_loop);
    assert!(server.bind("127.0.0.1:0".parse().unwrap()));

    let address = server.sock().expect("bound address");
    (server, address)
}

fn record_errors(handle: &TcpHandle) -> Rc<RefCell<Vec<i32>>> {
    let codes = Rc::new(RefCell::new(Vec::new()));
    let seen = codes.clone();
    handle.on(move |event: &ErrorEvent, _| seen.borrow_mut().push(event.code()));
    codes
}

#[traced_test]
#[test]
fn test_tcp_accept_and_echo() {
    let event_loop = Loop::new().expect("loop");
    let (server, address) = bound_server(&event_loop);
    let clients: Rc<RefCell<Vec<Rc<TcpHandle>>>> = Rc::default();

    let accepted = clients.clone();
    server.on(move |_: &ListenEvent, server: &TcpHandle| {
        let client = TcpHandle::init(server.event_loop());
        client.on(|event: &DataEvent, client: &TcpHandle| client.write(event.data.clone()));
        client.on(|_: &EndEvent, client: &TcpHandle| client.close());

        server.accept(&client);
        client.read();
        server.close();

        accepted.borrow_mut().push(client);
    });
    server.listen();

    let peer = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(address).expect("connect");
        stream.write_all(b"ping").expect("write");

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("read_exact");
        buf
    });

    event_loop.run();

    assert_eq!(&peer.join().unwrap(), b"ping");
    assert_eq!(clients.borrow().len(), 1);
    assert!(clients.borrow()[0].closing());
}

#[test]
fn test_echo_client_outlives_listen_handler() {
    let event_loop = Loop::new().expect("loop");
    let (server, address) = bound_server(&event_loop);

    server.on(|_: &ListenEvent, server: &TcpHandle| {
        let client = TcpHandle::init(server.event_loop());
        server.accept(&client);
        client.on(|event: &DataEvent, client: &TcpHandle| client.write(event.data.clone()));
        client.read();
        server.close();
    });
    server.listen();

    let peer = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(address).expect("connect");
        stream.write_all(b"ping").expect("write");

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("read_exact");
        buf
    });

    event_loop.run();

    assert_eq!(&peer.join().unwrap(), b"ping");
    assert!(!event_loop.alive());
}

#[test]
fn test_each_connection_gets_its_own_listen_event() {
    const PEERS: usize = 3;

    let event_loop = Loop::new().expect("loop");
    let (server, address) = bound_server(&event_loop);
    let codes = record_errors(&server);
    let accepted = Rc::new(RefCell::new(Vec::new()));

    let seen = accepted.clone();
    server.on(move |_: &ListenEvent, server: &TcpHandle| {
        let client = TcpHandle::init(server.event_loop());
        server.accept(&client);

        if seen.borrow().is_empty() {
            let extra = TcpHandle::init(server.event_loop());
            server.accept(&extra);
            assert!(extra.fileno().is_none());
        }

        seen.borrow_mut().push(client.peer().expect("accepted connection"));
        client.close();

        if seen.borrow().len() == PEERS {
            server.close();
        }
    });
    server.listen();

    let peers = thread::spawn(move || {
        (0..PEERS)
            .map(|_| StdTcpStream::connect(address).expect("connect"))
            .collect::<Vec<_>>()
    });

    event_loop.run();

    let mut expected: Vec<SocketAddr> = peers
        .join()
        .unwrap()
        .iter()
        .map(|stream| stream.local_addr().expect("local addr"))
        .collect();
    let mut remotes = accepted.borrow().clone();
    expected.sort();
    remotes.sort();

    assert_eq!(remotes, expected);
    assert_eq!(codes.borrow().len(), 1);
}

#[test]
fn test_writes_arrive_in_order_before_shutdown() {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("local addr");

    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut received = Vec::new();
        stream.read_to_end(&mut received).expect("read_to_end");
        received
    });

    let event_loop = Loop::new().expect("loop");
    let client = TcpHandle::init(&event_loop);
    let events = Rc::new(RefCell::new(Vec::new()));

    let seen = events.clone();
    client.on(move |_: &ConnectEvent, client: &TcpHandle| {
        seen.borrow_mut().push("connect");
        client.write(b"hello");
        client.write(b"abc".to_vec());
        client.shutdown();
    });

    let seen = events.clone();
    client.on(move |_: &WriteEvent, _| seen.borrow_mut().push("write"));

    let seen = events.clone();
    client.on(move |_: &ShutdownEvent, client: &TcpHandle| {
        seen.borrow_mut().push("shutdown");
        assert!(!client.writable());
        client.close();
    });

    let codes = record_errors(&client);
    client.connect(address);
    event_loop.run();

    assert_eq!(peer.join().unwrap(), b"helloabc");
    assert_eq!(*events.borrow(), vec!["connect", "write", "write", "shutdown"]);
    assert!(codes.borrow().is_empty());
}

#[test]
fn test_connect_refused_publishes_error() {
    let address = {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr")
    };

    let event_loop = Loop::new().expect("loop");
    let client = TcpHandle::init(&event_loop);
    let codes = record_errors(&client);

    client.on(|_: &ConnectEvent, _| panic!("nothing listens on this port"));
    client.connect(address);
    event_loop.run();

    assert_eq!(*codes.borrow(), vec![-libc::ECONNREFUSED]);
}

#[test]
fn test_second_accept_fails_without_listen_event() {
    let event_loop = Loop::new().expect("loop");
    let (server, address) = bound_server(&event_loop);
    let codes = record_errors(&server);
    let peers = Rc::new(RefCell::new(Vec::new()));

    let accepted = peers.clone();
    server.on(move |_: &ListenEvent, server: &TcpHandle| {
        let first = TcpHandle::init(server.event_loop());
        let second = TcpHandle::init(server.event_loop());

        server.accept(&first);
        server.accept(&second);

        accepted
            .borrow_mut()
            .push((first.fileno().is_some(), second.fileno().is_some()));

        first.close();
        second.close();
        server.close();
    });
    server.listen();

    let peer = thread::spawn(move || {
        StdTcpStream::connect(address).expect("connect");
    });

    event_loop.run();
    peer.join().unwrap();

    assert_eq!(*peers.borrow(), vec![(true, false)]);
    assert_eq!(codes.borrow().len(), 1);
}

#[test]
fn test_accept_across_loops_fails() {
    let first_loop = Loop::new().expect("loop");
    let second_loop = Loop::new().expect("loop");

    let (server, _) = bound_server(&first_loop);
    let foreign = TcpHandle::init(&second_loop);
    let codes = record_errors(&server);

    server.accept(&foreign);

    assert_eq!(*codes.borrow(), vec![-libc::EINVAL]);
    assert!(foreign.fileno().is_none());
}

#[test]
fn test_listen_without_bind_fails() {
    let event_loop = Loop::new().expect("loop");
    let server = TcpHandle::init(&event_loop);
    let codes = record_errors(&server);

    server.listen_with_backlog(16);

    assert_eq!(*codes.borrow(), vec![-libc::EINVAL]);
    assert!(!server.active());
}

#[test]
fn test_sock_and_peer_addresses() {
    let event_loop = Loop::new().expect("loop");
    let (server, address) = bound_server(&event_loop);
    let addresses = Rc::new(RefCell::new(None));

    let seen = addresses.clone();
    server.on(move |_: &ListenEvent, server: &TcpHandle| {
        let client = TcpHandle::init(server.event_loop());
        server.accept(&client);

        *seen.borrow_mut() = Some((client.sock(), client.peer()));

        client.close();
        server.close();
    });
    server.listen();
    assert!(server.active());

    let peer = thread::spawn(move || {
        let stream = StdTcpStream::connect(address).expect("connect");
        stream.local_addr().expect("local addr")
    });

    event_loop.run();
    let peer_address = peer.join().unwrap();

    let (local, remote) = addresses.borrow_mut().take().expect("accepted");
    assert_eq!(local, Some(address));
    assert_eq!(remote, Some(peer_address));
}
