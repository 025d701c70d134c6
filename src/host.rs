use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use slab::Slab;

use crate::{Descriptor, Handle};

/// The host-side hook the epoll core calls back into.
pub trait Host {
    /// Initiate removal of `handle` from the host's descriptor table. Called
    /// once per epoll, during finalization.
    fn close_descriptor(&self, handle: Handle);
}

/// A host's table of open virtual descriptors.
///
/// Allocates stable small-integer [`Handle`]s from a slab and owns the
/// strong references that keep descriptors alive while they are open.
/// Handles are reused after removal, as file descriptor numbers are.
pub struct DescriptorTable {
    slab: RefCell<Slab<Rc<Descriptor>>>,
}

impl DescriptorTable {
    pub fn new() -> DescriptorTable {
        DescriptorTable {
            slab: RefCell::new(Slab::new()),
        }
    }

    /// Allocate the next free handle and insert the descriptor `build`
    /// returns for it. `build` must not touch this table.
    pub fn insert<F>(&self, build: F) -> Rc<Descriptor>
    where
        F: FnOnce(Handle) -> Rc<Descriptor>,
    {
        let mut slab = self.slab.borrow_mut();

        let entry = slab.vacant_entry();
        let descriptor = build(Handle(entry.key()));
        entry.insert(Rc::clone(&descriptor));

        descriptor
    }

    pub fn get(&self, handle: Handle) -> Option<Rc<Descriptor>> {
        self.slab.borrow().get(handle.0).cloned()
    }

    pub fn remove(&self, handle: Handle) -> Option<Rc<Descriptor>> {
        self.slab.borrow_mut().try_remove(handle.0)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slab.borrow().contains(handle.0)
    }

    pub fn len(&self) -> usize {
        self.slab.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.borrow().is_empty()
    }
}

impl Default for DescriptorTable {
    fn default() -> DescriptorTable {
        DescriptorTable::new()
    }
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "DescriptorTable {{ len: {} }}", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_and_reused() {
        let table = DescriptorTable::new();

        let a = table.insert(|handle| Rc::new(Descriptor::new(handle)));
        let b = table.insert(|handle| Rc::new(Descriptor::new(handle)));
        assert_eq!(a.handle(), Handle(0));
        assert_eq!(b.handle(), Handle(1));

        assert!(table.contains(a.handle()));
        assert!(table.remove(a.handle()).is_some());
        assert!(!table.contains(a.handle()));
        assert!(table.remove(a.handle()).is_none());

        // Freed slot is handed out again.
        let c = table.insert(|handle| Rc::new(Descriptor::new(handle)));
        assert_eq!(c.handle(), Handle(0));
        assert_eq!(table.len(), 2);
    }
}
