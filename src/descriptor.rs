use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Status;

/// The stable handle a descriptor is known by within its host.
///
/// Handles are plain small integers allocated by the host's
/// [`DescriptorTable`](crate::DescriptorTable) and are the key under which a
/// watch is stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub usize);

impl From<usize> for Handle {
    #[inline]
    fn from(val: usize) -> Handle {
        Handle(val)
    }
}

impl From<Handle> for usize {
    #[inline]
    fn from(val: Handle) -> usize {
        val.0
    }
}

/// Identity of a status-change listener.
///
/// Listeners are stored as non-owning references keyed by this id, so
/// unsubscribing never needs to compare trait-object pointers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

impl ListenerId {
    pub fn next() -> ListenerId {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Receiver of synchronous status-change callbacks from a [`Descriptor`].
pub trait StatusListener {
    /// Invoked whenever the status bits of the subscribed descriptor
    /// effectively change. Runs synchronously with the mutation; the
    /// listener must not re-enter control operations for the same watch.
    fn status_changed(&self, descriptor: Handle);
}

/// A simulator-managed I/O handle.
///
/// The object backing a descriptor (a simulated socket, pipe, timer, or an
/// epoll instance itself) drives the status bits with [`set_status`]; every
/// effective change fans out synchronously to the subscribed listeners.
/// Reference counting is `Rc`: a watch holds a strong reference to the
/// descriptor it watches, while the descriptor holds only weak references
/// back to its listeners, so the relation never forms a cycle.
///
/// [`set_status`]: Descriptor::set_status
pub struct Descriptor {
    handle: Handle,
    status: Cell<Status>,
    listeners: RefCell<Vec<(ListenerId, Weak<dyn StatusListener>)>>,
}

impl Descriptor {
    pub fn new(handle: Handle) -> Descriptor {
        Descriptor {
            handle,
            status: Cell::new(Status::empty()),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Set (`on == true`) or clear the given status bits.
    ///
    /// Listeners are notified only when the effective bit pattern changed;
    /// setting a bit that is already set is a no-op. This also bounds the
    /// mutual-notification chain between two epolls that watch each other.
    pub fn set_status(&self, bits: Status, on: bool) {
        let old = self.status.get();
        let new = if on { old | bits } else { old - bits };

        if new == old {
            return;
        }

        self.status.set(new);

        // Snapshot so a listener that (un)subscribes mid-callback cannot
        // invalidate the iteration.
        let listeners = self.listeners.borrow().clone();

        for (_, listener) in listeners {
            if let Some(listener) = listener.upgrade() {
                listener.status_changed(self.handle);
            }
        }
    }

    /// Register a listener under `id`, replacing any previous registration
    /// with the same id.
    pub fn subscribe(&self, id: ListenerId, listener: Weak<dyn StatusListener>) {
        let mut listeners = self.listeners.borrow_mut();

        listeners.retain(|(other, _)| *other != id);
        listeners.push((id, listener));
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .borrow_mut()
            .retain(|(other, _)| *other != id);
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Descriptor")
            .field("handle", &self.handle)
            .field("status", &self.status.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        fired: Cell<usize>,
    }

    impl StatusListener for Recorder {
        fn status_changed(&self, _descriptor: Handle) {
            self.fired.set(self.fired.get() + 1);
        }
    }

    #[test]
    fn fires_only_on_effective_change() {
        let descriptor = Descriptor::new(Handle(3));
        let recorder = Rc::new(Recorder {
            fired: Cell::new(0),
        });

        let id = ListenerId::next();
        let recorder_dyn = Rc::clone(&recorder) as Rc<dyn StatusListener>;
        let weak: Weak<dyn StatusListener> = Rc::downgrade(&recorder_dyn);
        descriptor.subscribe(id, weak);

        descriptor.set_status(Status::readable(), true);
        assert_eq!(recorder.fired.get(), 1);

        // Already set, no callback.
        descriptor.set_status(Status::readable(), true);
        assert_eq!(recorder.fired.get(), 1);

        descriptor.set_status(Status::readable(), false);
        assert_eq!(recorder.fired.get(), 2);

        descriptor.unsubscribe(id);
        descriptor.set_status(Status::readable(), true);
        assert_eq!(recorder.fired.get(), 2);
    }

    #[test]
    fn resubscribe_replaces_by_id() {
        let descriptor = Descriptor::new(Handle(0));
        let recorder = Rc::new(Recorder {
            fired: Cell::new(0),
        });

        let id = ListenerId::next();
        let recorder_dyn = Rc::clone(&recorder) as Rc<dyn StatusListener>;
        let first: Weak<dyn StatusListener> = Rc::downgrade(&recorder_dyn);
        let second: Weak<dyn StatusListener> = Rc::downgrade(&recorder_dyn);
        descriptor.subscribe(id, first);
        descriptor.subscribe(id, second);

        // A duplicate registration would fire twice.
        descriptor.set_status(Status::writable(), true);
        assert_eq!(recorder.fired.get(), 1);
    }

    #[test]
    fn dropped_listener_is_skipped() {
        let descriptor = Descriptor::new(Handle(1));

        let recorder = Rc::new(Recorder {
            fired: Cell::new(0),
        });
        let recorder_dyn = Rc::clone(&recorder) as Rc<dyn StatusListener>;
        let weak: Weak<dyn StatusListener> = Rc::downgrade(&recorder_dyn);
        descriptor.subscribe(ListenerId::next(), weak);
        drop(recorder_dyn);
        drop(recorder);

        // Upgrade fails, no panic.
        descriptor.set_status(Status::active(), true);
    }
}
