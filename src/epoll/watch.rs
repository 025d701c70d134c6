use std::fmt;
use std::rc::Rc;

use crate::{Descriptor, EpollOpt, Event, Ready, Token};

/// Per-watch bookkeeping bits.
///
/// The status- and subscription-derived bits are overwritten from fresh
/// inputs on every [`refresh`](Watch::refresh); the sticky bits survive
/// refreshes and are only touched by the operations that own them
/// (collection clears the change bits, MOD clears the reported bits, DEL
/// clears `WATCHING`).
#[derive(Copy, PartialEq, Eq, Clone)]
pub struct WatchFlags(u16);

const ACTIVE: u16           = 1 << 0;
const READABLE: u16         = 1 << 1;
const WRITABLE: u16         = 1 << 2;
const CLOSED: u16           = 1 << 3;
const WAITING_READ: u16     = 1 << 4;
const WAITING_WRITE: u16    = 1 << 5;
const EDGE: u16             = 1 << 6;
const ONESHOT: u16          = 1 << 7;
const READ_CHANGED: u16     = 1 << 8;
const WRITE_CHANGED: u16    = 1 << 9;
const EDGE_REPORTED: u16    = 1 << 10;
const ONESHOT_REPORTED: u16 = 1 << 11;
const WATCHING: u16         = 1 << 12;

const STICKY: u16 = READ_CHANGED | WRITE_CHANGED | EDGE_REPORTED | ONESHOT_REPORTED | WATCHING;

impl WatchFlags {
    #[inline]
    pub fn active() -> WatchFlags {
        WatchFlags(ACTIVE)
    }

    #[inline]
    pub fn readable() -> WatchFlags {
        WatchFlags(READABLE)
    }

    #[inline]
    pub fn writable() -> WatchFlags {
        WatchFlags(WRITABLE)
    }

    #[inline]
    pub fn closed() -> WatchFlags {
        WatchFlags(CLOSED)
    }

    #[inline]
    pub fn waiting_read() -> WatchFlags {
        WatchFlags(WAITING_READ)
    }

    #[inline]
    pub fn waiting_write() -> WatchFlags {
        WatchFlags(WAITING_WRITE)
    }

    #[inline]
    pub fn edge() -> WatchFlags {
        WatchFlags(EDGE)
    }

    #[inline]
    pub fn oneshot() -> WatchFlags {
        WatchFlags(ONESHOT)
    }

    #[inline]
    pub fn read_changed() -> WatchFlags {
        WatchFlags(READ_CHANGED)
    }

    #[inline]
    pub fn write_changed() -> WatchFlags {
        WatchFlags(WRITE_CHANGED)
    }

    #[inline]
    pub fn edge_reported() -> WatchFlags {
        WatchFlags(EDGE_REPORTED)
    }

    #[inline]
    pub fn oneshot_reported() -> WatchFlags {
        WatchFlags(ONESHOT_REPORTED)
    }

    #[inline]
    pub fn watching() -> WatchFlags {
        WatchFlags(WATCHING)
    }

    #[inline]
    fn sticky() -> WatchFlags {
        WatchFlags(STICKY)
    }

    #[inline]
    pub fn contains(self, other: WatchFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: WatchFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: WatchFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for WatchFlags {
    type Output = WatchFlags;

    #[inline]
    fn bitor(self, other: WatchFlags) -> WatchFlags {
        WatchFlags(self.0 | other.0)
    }
}

impl std::ops::BitAnd for WatchFlags {
    type Output = WatchFlags;

    #[inline]
    fn bitand(self, other: WatchFlags) -> WatchFlags {
        WatchFlags(self.0 & other.0)
    }
}

impl fmt::Debug for WatchFlags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (WatchFlags::active(), "Active"),
            (WatchFlags::readable(), "Readable"),
            (WatchFlags::writable(), "Writable"),
            (WatchFlags::closed(), "Closed"),
            (WatchFlags::waiting_read(), "WaitingRead"),
            (WatchFlags::waiting_write(), "WaitingWrite"),
            (WatchFlags::edge(), "Edge"),
            (WatchFlags::oneshot(), "OneShot"),
            (WatchFlags::read_changed(), "ReadChanged"),
            (WatchFlags::write_changed(), "WriteChanged"),
            (WatchFlags::edge_reported(), "EdgeReported"),
            (WatchFlags::oneshot_reported(), "OneShotReported"),
            (WatchFlags::watching(), "Watching"),
        ];

        write!(fmt, "WatchFlags {{")?;

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        write!(fmt, "}}")?;

        Ok(())
    }
}

/// One epoll's subscription record for one virtual descriptor.
///
/// Holds a strong reference to the descriptor, the last-applied
/// subscription, and the flag vector. A watch removed from its table keeps
/// living while a collection snapshot still holds it; the cleared
/// `WATCHING` bit excludes it from reporting until the last reference
/// drops.
pub struct Watch {
    descriptor: Rc<Descriptor>,
    token: Token,
    interest: Ready,
    opts: EpollOpt,
    flags: WatchFlags,
}

impl Watch {
    pub fn new(descriptor: Rc<Descriptor>, token: Token, interest: Ready, opts: EpollOpt) -> Watch {
        let mut watch = Watch {
            descriptor,
            token,
            interest,
            opts,
            flags: WatchFlags::watching(),
        };

        watch.refresh();
        watch
    }

    pub fn descriptor(&self) -> &Rc<Descriptor> {
        &self.descriptor
    }

    /// Replace the subscription. Re-arms edge and one-shot reporting.
    pub fn set_subscription(&mut self, token: Token, interest: Ready, opts: EpollOpt) {
        self.token = token;
        self.interest = interest;
        self.opts = opts;

        self.flags
            .remove(WatchFlags::edge_reported() | WatchFlags::oneshot_reported());

        self.refresh();
    }

    /// Take the watch out of reporting without touching any in-flight
    /// sweep that still references it.
    pub fn clear_watching(&mut self) {
        self.flags.remove(WatchFlags::watching());
    }

    /// Overwrite the status- and subscription-derived flags from fresh
    /// inputs, preserving the sticky bits. Readable/writable transitions
    /// observed here latch into the change bits until the next collection.
    pub fn refresh(&mut self) {
        let status = self.descriptor.status();
        let prior = self.flags;

        let mut flags = prior & WatchFlags::sticky();

        if status.is_active() {
            flags.insert(WatchFlags::active());
        }

        if status.is_readable() {
            flags.insert(WatchFlags::readable());
        }

        if status.is_writable() {
            flags.insert(WatchFlags::writable());
        }

        if status.is_closed() {
            flags.insert(WatchFlags::closed());
        }

        if self.interest.is_readable() {
            flags.insert(WatchFlags::waiting_read());
        }

        if self.interest.is_writable() {
            flags.insert(WatchFlags::waiting_write());
        }

        if self.opts.is_edge() {
            flags.insert(WatchFlags::edge());
        }

        if self.opts.is_oneshot() {
            flags.insert(WatchFlags::oneshot());
        }

        if flags.contains(WatchFlags::readable()) != prior.contains(WatchFlags::readable()) {
            flags.insert(WatchFlags::read_changed());
        }

        if flags.contains(WatchFlags::writable()) != prior.contains(WatchFlags::writable()) {
            flags.insert(WatchFlags::write_changed());
        }

        self.flags = flags;
    }

    /// Refresh and decide whether this watch currently has a reportable
    /// event under its reporting mode.
    pub fn ready(&mut self) -> bool {
        self.refresh();
        self.is_ready()
    }

    fn is_ready(&self) -> bool {
        let flags = self.flags;

        if !flags.contains(WatchFlags::active())
            || flags.contains(WatchFlags::closed())
            || !flags.contains(WatchFlags::watching())
        {
            return false;
        }

        let read = flags.contains(WatchFlags::readable() | WatchFlags::waiting_read());
        let write = flags.contains(WatchFlags::writable() | WatchFlags::waiting_write());

        if !read && !write {
            return false;
        }

        if flags.contains(WatchFlags::oneshot() | WatchFlags::oneshot_reported()) {
            return false;
        }

        if flags.contains(WatchFlags::edge()) {
            // A direction qualifies on a fresh transition, and the first
            // report after ADD/MOD is always allowed.
            let armed = !flags.contains(WatchFlags::edge_reported());
            let read_qualifies = read && (flags.contains(WatchFlags::read_changed()) || armed);
            let write_qualifies = write && (flags.contains(WatchFlags::write_changed()) || armed);

            return read_qualifies || write_qualifies;
        }

        true
    }

    /// The event this watch reports: both candidate directions merged,
    /// the edge bit passed through, and the caller's token.
    pub fn event(&self) -> Event {
        let flags = self.flags;
        let mut ready = Ready::empty();

        if flags.contains(WatchFlags::readable() | WatchFlags::waiting_read()) {
            ready.insert(Ready::readable());
        }

        if flags.contains(WatchFlags::writable() | WatchFlags::waiting_write()) {
            ready.insert(Ready::writable());
        }

        let opts = if flags.contains(WatchFlags::edge()) {
            EpollOpt::edge()
        } else {
            EpollOpt::empty()
        };

        Event::new(ready, opts, self.token)
    }

    /// Record a delivery: arm the mode-specific suppression bits and clear
    /// the change bits.
    pub fn mark_reported(&mut self) {
        if self.flags.contains(WatchFlags::edge()) {
            self.flags.insert(WatchFlags::edge_reported());
        }

        if self.flags.contains(WatchFlags::oneshot()) {
            self.flags.insert(WatchFlags::oneshot_reported());
        }

        self.flags
            .remove(WatchFlags::read_changed() | WatchFlags::write_changed());
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Watch")
            .field("descriptor", &self.descriptor.handle())
            .field("token", &self.token)
            .field("interest", &self.interest)
            .field("opts", &self.opts)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handle, Status};

    fn open_descriptor() -> Rc<Descriptor> {
        let descriptor = Rc::new(Descriptor::new(Handle(1)));
        descriptor.set_status(Status::active(), true);
        descriptor
    }

    fn watch(descriptor: &Rc<Descriptor>, interest: Ready, opts: EpollOpt) -> Watch {
        Watch::new(Rc::clone(descriptor), Token(42), interest, opts)
    }

    #[test]
    fn level_reports_while_condition_holds() {
        let descriptor = open_descriptor();
        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::empty());

        assert!(!watch.ready());

        descriptor.set_status(Status::readable(), true);
        assert!(watch.ready());

        watch.mark_reported();
        assert!(watch.ready());

        descriptor.set_status(Status::readable(), false);
        assert!(!watch.ready());
    }

    #[test]
    fn inactive_or_closed_suppresses() {
        let descriptor = Rc::new(Descriptor::new(Handle(1)));
        descriptor.set_status(Status::readable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::empty());
        assert!(!watch.ready());

        descriptor.set_status(Status::active(), true);
        assert!(watch.ready());

        descriptor.set_status(Status::closed(), true);
        assert!(!watch.ready());
    }

    #[test]
    fn lazily_deleted_watch_never_reports() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::readable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::empty());
        assert!(watch.ready());

        watch.clear_watching();
        assert!(!watch.ready());
    }

    #[test]
    fn edge_suppresses_repeat_without_transition() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::readable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::edge());

        // First report after ADD is always allowed.
        assert!(watch.ready());
        watch.mark_reported();

        assert!(!watch.ready());

        // A full flap is a single new transition.
        descriptor.set_status(Status::readable(), false);
        watch.refresh();
        descriptor.set_status(Status::readable(), true);
        assert!(watch.ready());

        watch.mark_reported();
        assert!(!watch.ready());
    }

    #[test]
    fn edge_transition_survives_intermediate_refreshes() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::readable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::edge());
        watch.mark_reported();

        descriptor.set_status(Status::readable(), false);
        watch.refresh();
        descriptor.set_status(Status::readable(), true);
        watch.refresh();
        watch.refresh();

        // The change bit latched even though nothing collected in between.
        assert!(watch.ready());
    }

    #[test]
    fn oneshot_reports_once_until_resubscribed() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::readable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::oneshot());

        assert!(watch.ready());
        watch.mark_reported();

        descriptor.set_status(Status::readable(), false);
        watch.refresh();
        descriptor.set_status(Status::readable(), true);
        assert!(!watch.ready());

        watch.set_subscription(Token(42), Ready::readable(), EpollOpt::oneshot());
        assert!(watch.ready());
    }

    #[test]
    fn modify_rearms_edge_reporting() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::readable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::edge());
        watch.mark_reported();
        assert!(!watch.ready());

        watch.set_subscription(Token(7), Ready::readable(), EpollOpt::edge());
        assert!(watch.ready());
        assert_eq!(watch.event().token(), Token(7));
    }

    #[test]
    fn event_merges_both_directions() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::readable() | Status::writable(), true);

        let mut watch = watch(
            &descriptor,
            Ready::readable() | Ready::writable(),
            EpollOpt::edge(),
        );

        assert!(watch.ready());
        let event = watch.event();
        assert!(event.readiness().is_readable());
        assert!(event.readiness().is_writable());
        assert!(event.opts().is_edge());
        assert_eq!(event.token(), Token(42));
    }

    #[test]
    fn uninterested_direction_is_not_reported() {
        let descriptor = open_descriptor();
        descriptor.set_status(Status::writable(), true);

        let mut watch = watch(&descriptor, Ready::readable(), EpollOpt::empty());
        assert!(!watch.ready());

        descriptor.set_status(Status::readable(), true);
        assert!(watch.ready());

        let event = watch.event();
        assert!(event.readiness().is_readable());
        assert!(!event.readiness().is_writable());
    }
}
