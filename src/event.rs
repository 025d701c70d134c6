use crate::{EpollOpt, Ready};

/// The caller-chosen cookie attached to a subscription.
///
/// An epoll never interprets the value; it is stored with the watch and
/// handed back in every [`Event`] collected for it, which is how the
/// application maps an event to the descriptor that produced it. On the OS
/// passthrough side the cookie rides in the kernel event's data field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Token(pub usize);

/// A single collected readiness event.
///
/// Carries the readiness that qualified the watch, the reporting mode the
/// watch was subscribed with (so edge-triggered consumers can see the edge
/// bit passed through), and the caller's [`Token`] cookie.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Event {
    ready: Ready,
    opts: EpollOpt,
    token: Token,
}

impl Event {
    pub fn new(ready: Ready, opts: EpollOpt, token: Token) -> Event {
        Event { ready, opts, token }
    }

    pub fn readiness(&self) -> Ready {
        self.ready
    }

    pub fn opts(&self) -> EpollOpt {
        self.opts
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// A fixed-capacity buffer of collected events.
///
/// A collection pass never writes more than `capacity` events; callers
/// usually create one `Events` and reuse it across calls.
pub struct Events {
    events: Vec<Event>,
    capacity: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get(&self, idx: usize) -> Option<Event> {
        self.events.get(idx).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn iter(&self) -> Iter {
        Iter {
            inner: self,
            pos: 0,
        }
    }

    pub(crate) fn push(&mut self, event: Event) {
        debug_assert!(!self.is_full());
        self.events.push(event);
    }
}

/// [`Events`] iterator, created by [`Events::iter`].
pub struct Iter<'a> {
    inner: &'a Events,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let ret = self.inner.get(self.pos);
        self.pos += 1;
        ret
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
