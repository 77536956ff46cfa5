//! Per-object typed event bus.
//!
//! Every handle and request embeds an [`Emitter`] parameterised by its own
//! type, so listeners receive both the event and the object that published it.
//! Listeners are keyed by event type; publishing an event only reaches the
//! listeners registered for that exact type.
//!
//! Publication is synchronous and re-entrant: a listener may subscribe, erase
//! or publish further events while it runs. The listener list is snapshotted
//! at the start of a publication, so listeners added during it only see later
//! events.

use crate::event::Event;

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

type Listener<E, T> = Rc<RefCell<dyn FnMut(&E, &T)>>;

struct Entry<E, T> {
    id: u64,
    once: bool,
    alive: Rc<Cell<bool>>,
    listener: Listener<E, T>,
}

struct Handlers<E, T> {
    entries: Vec<Entry<E, T>>,
}

trait AnyHandlers {
    fn clear(&mut self);
    fn is_empty(&self) -> bool;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: 'static, T: 'static> AnyHandlers for Handlers<E, T> {
    fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.alive.set(false);
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Registration returned by [`Emitter::on`] and [`Emitter::once`], used to
/// [`erase`](Emitter::erase) a single listener.
pub struct Connection<E> {
    id: u64,
    _event: PhantomData<fn(&E)>,
}

impl<E> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Typed event bus owned by an object of type `T`.
pub struct Emitter<T> {
    handlers: RefCell<HashMap<TypeId, Box<dyn AnyHandlers>>>,
    next_id: Cell<u64>,
    _owner: PhantomData<fn(&T)>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            _owner: PhantomData,
        }
    }

    /// Registers a listener invoked for every event of type `E`.
    pub fn on<E, F>(&self, listener: F) -> Connection<E>
    where
        E: Event,
        F: FnMut(&E, &T) + 'static,
    {
        self.subscribe(false, Rc::new(RefCell::new(listener)))
    }

    /// Registers a listener invoked for the next event of type `E` only.
    pub fn once<E, F>(&self, listener: F) -> Connection<E>
    where
        E: Event,
        F: FnOnce(&E, &T) + 'static,
    {
        let mut listener = Some(listener);

        self.subscribe(
            true,
            Rc::new(RefCell::new(move |event: &E, owner: &T| {
                if let Some(listener) = listener.take() {
                    listener(event, owner);
                }
            })),
        )
    }

    /// Removes a single listener. Erasing a listener that already fired or
    /// was cleared is a no-op.
    pub fn erase<E: Event>(&self, connection: Connection<E>) {
        let mut handlers = self.handlers.borrow_mut();

        if let Some(handlers) = handlers
            .get_mut(&TypeId::of::<E>())
            .and_then(|handlers| handlers.as_any_mut().downcast_mut::<Handlers<E, T>>())
        {
            handlers.entries.retain(|entry| {
                if entry.id == connection.id {
                    entry.alive.set(false);
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Removes every listener for events of type `E`.
    pub fn clear<E: Event>(&self) {
        if let Some(handlers) = self.handlers.borrow_mut().get_mut(&TypeId::of::<E>()) {
            handlers.clear();
        }
    }

    /// Removes every listener.
    pub fn clear_all(&self) {
        for handlers in self.handlers.borrow_mut().values_mut() {
            handlers.clear();
        }
    }

    /// Returns true if no listener is registered for events of type `E`.
    pub fn is_empty<E: Event>(&self) -> bool {
        self.handlers
            .borrow()
            .get(&TypeId::of::<E>())
            .map(|handlers| handlers.is_empty())
            .unwrap_or(true)
    }

    /// Returns true if no listener is registered at all.
    pub fn is_empty_all(&self) -> bool {
        self.handlers
            .borrow()
            .values()
            .all(|handlers| handlers.is_empty())
    }

    /// Delivers `event` to the listeners registered for its type.
    ///
    /// Without listeners the event is dropped silently.
    pub fn publish<E: Event>(&self, event: E, owner: &T) {
        let snapshot: Vec<(bool, Rc<Cell<bool>>, Listener<E, T>)> = {
            let mut handlers = self.handlers.borrow_mut();

            let Some(handlers) = handlers
                .get_mut(&TypeId::of::<E>())
                .and_then(|handlers| handlers.as_any_mut().downcast_mut::<Handlers<E, T>>())
            else {
                return;
            };

            let snapshot = handlers
                .entries
                .iter()
                .map(|entry| (entry.once, entry.alive.clone(), entry.listener.clone()))
                .collect();

            handlers.entries.retain(|entry| !entry.once);

            snapshot
        };

        for (once, alive, listener) in snapshot {
            if !alive.get() {
                continue;
            }

            if once {
                alive.set(false);
            }

            // A listener that is already running is not re-entered.
            if let Ok(mut listener) = listener.try_borrow_mut() {
                (*listener)(&event, owner);
            }
        }
    }

    fn subscribe<E: Event>(&self, once: bool, listener: Listener<E, T>) -> Connection<E> {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));

        let mut handlers = self.handlers.borrow_mut();
        let slot = handlers
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Handlers::<E, T> { entries: Vec::new() }));

        if let Some(handlers) = slot.as_any_mut().downcast_mut::<Handlers<E, T>>() {
            handlers.entries.push(Entry {
                id,
                once,
                alive: Rc::new(Cell::new(true)),
                listener,
            });
        }

        Connection {
            id,
            _event: PhantomData,
        }
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("event_types", &self.handlers.borrow().len())
            .finish()
    }
}
