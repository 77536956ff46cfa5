use duplex::{Emitter, ErrorEvent, Event, Loop, TcpHandle, WriteEvent};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn test_once_listener_fires_a_single_time() {
    let event_loop = Loop::new().expect("loop");
    let stream = TcpHandle::init(&event_loop);
    let count = Rc::new(Cell::new(0));

    let seen = count.clone();
    stream.once(move |event: &ErrorEvent, _| {
        assert_eq!(event.name(), "EBADF");
        seen.set(seen.get() + 1);
    });

    stream.try_write(b"first");
    stream.try_write(b"second");

    assert_eq!(count.get(), 1);
    assert!(!stream.has_listeners::<ErrorEvent>());
}

#[test]
fn test_erase_and_clear_detach_listeners() {
    let event_loop = Loop::new().expect("loop");
    let stream = TcpHandle::init(&event_loop);
    let count = Rc::new(Cell::new(0));

    let seen = count.clone();
    let connection = stream.on(move |_: &ErrorEvent, _| seen.set(seen.get() + 1));
    stream.try_write(b"x");
    stream.erase(connection);
    stream.try_write(b"x");
    assert_eq!(count.get(), 1);

    let seen = count.clone();
    stream.on(move |_: &ErrorEvent, _| seen.set(seen.get() + 1));
    stream.clear::<ErrorEvent>();
    stream.try_write(b"x");
    assert_eq!(count.get(), 1);

    stream.on(|_: &WriteEvent, _| {});
    stream.clear_all();
    assert!(!stream.has_listeners::<WriteEvent>());
}

#[test]
fn test_unobserved_errors_are_dropped() {
    let event_loop = Loop::new().expect("loop");
    let stream = TcpHandle::init(&event_loop);

    assert_eq!(stream.try_write(b"nobody listens"), 0);
    stream.shutdown();
    stream.read();
}

#[derive(Debug)]
struct Progress(usize);

impl Event for Progress {}

struct Job {
    emitter: Emitter<Job>,
    log: RefCell<Vec<usize>>,
}

#[test]
fn test_emitter_delivers_custom_events_with_owner() {
    let job = Job {
        emitter: Emitter::new(),
        log: RefCell::new(Vec::new()),
    };

    job.emitter
        .on(|event: &Progress, job: &Job| job.log.borrow_mut().push(event.0));

    job.emitter.publish(Progress(10), &job);
    job.emitter.publish(Progress(20), &job);

    assert_eq!(*job.log.borrow(), vec![10, 20]);
    assert!(job.emitter.is_empty::<ErrorEvent>());
    assert!(!job.emitter.is_empty_all());
}
