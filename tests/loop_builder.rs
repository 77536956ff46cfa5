use duplex::{CloseEvent, Loop, LoopBuilder, PipeHandle};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_builder_creation() {
    let event_loop = LoopBuilder::new().build().expect("build loop");
    drop(event_loop);
}

#[test]
fn test_builder_custom_config() {
    let event_loop = Loop::builder()
        .max_events(8)
        .read_buffer_size(512)
        .reads_per_tick(4)
        .build()
        .expect("build loop");

    let config = event_loop.config();
    assert_eq!(config.max_events, 8);
    assert_eq!(config.read_buffer_size, 512);
    assert_eq!(config.reads_per_tick, 4);
}

#[test]
fn test_builder_multiple_instances() {
    let first = LoopBuilder::new().build().expect("first loop");
    let second = LoopBuilder::new().build().expect("second loop");

    assert!(!Rc::ptr_eq(&first, &second));
    assert!(!first.run());
    assert!(!second.run());
}

#[test]
fn test_default_loop_is_per_thread() {
    let here = Loop::get_default().expect("default loop");
    assert!(Rc::ptr_eq(&here, &Loop::get_default().expect("default loop")));

    let other = std::thread::spawn(|| {
        let there = Loop::get_default().expect("default loop");
        Rc::as_ptr(&there) as usize
    })
    .join()
    .unwrap();

    assert_ne!(Rc::as_ptr(&here) as usize, other);
}

#[test]
fn test_stop_interrupts_run() {
    let event_loop = Loop::new().expect("loop");
    let (left, right) = PipeHandle::pair(&event_loop, false).expect("pipe pair");
    let iterations = Rc::new(Cell::new(0));

    // Nothing is ever written, so the read keeps the loop alive.
    right.read();

    let seen = iterations.clone();
    left.on(move |_: &duplex::WriteEvent, pipe: &PipeHandle| {
        seen.set(seen.get() + 1);
        pipe.event_loop().stop();
    });
    left.write(b"x");

    assert!(event_loop.run());
    assert_eq!(iterations.get(), 1);

    left.close();
    right.close();
    assert!(!event_loop.run());
}

#[test]
fn test_close_event_is_published_once() {
    let event_loop = Loop::new().expect("loop");
    let (left, right) = PipeHandle::pair(&event_loop, false).expect("pipe pair");
    let closes = Rc::new(Cell::new(0));

    let seen = closes.clone();
    left.on(move |_: &CloseEvent, _| seen.set(seen.get() + 1));

    left.close();
    left.close();
    assert!(left.closing());
    assert_eq!(closes.get(), 0);

    event_loop.run();
    assert_eq!(closes.get(), 1);

    right.close();
    event_loop.run_nowait();
}
