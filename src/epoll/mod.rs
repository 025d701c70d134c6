use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, trace, warn};

use crate::sys;
use crate::{
    Descriptor, EpollOpt, Events, Handle, Host, ListenerId, Process, Ready, Scheduler, Status,
    StatusListener, Token,
};

use self::watch::Watch;

mod watch;

/// Virtual delay, in simulation time units, between readiness being
/// observed and the deferred notification task running.
const NOTIFY_DELAY: u64 = 1;

/// A control operation on an epoll's interest list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlOp {
    Add,
    Modify,
    Delete,
}

#[derive(Copy, PartialEq, Eq, Clone)]
struct Flags(u8);

const SCHEDULED: u8 = 0b001;
const NOTIFYING: u8 = 0b010;
const CLOSED: u8    = 0b100;

impl Flags {
    #[inline]
    fn empty() -> Flags {
        Flags(0)
    }

    #[inline]
    fn scheduled() -> Flags {
        Flags(SCHEDULED)
    }

    #[inline]
    fn notifying() -> Flags {
        Flags(NOTIFYING)
    }

    #[inline]
    fn closed() -> Flags {
        Flags(CLOSED)
    }

    #[inline]
    fn is_scheduled(self) -> bool {
        self.0 & SCHEDULED != 0
    }

    #[inline]
    fn is_notifying(self) -> bool {
        self.0 & NOTIFYING != 0
    }

    #[inline]
    fn is_closed(self) -> bool {
        self.0 & CLOSED != 0
    }

    #[inline]
    fn insert(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    #[inline]
    fn remove(self, other: Flags) -> Flags {
        Flags(self.0 & !other.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (SCHEDULED, "Scheduled"),
            (NOTIFYING, "Notifying"),
            (CLOSED, "Closed"),
        ];

        write!(fmt, "Flags {{")?;

        for &(flag, msg) in &flags {
            if self.0 & flag != 0 {
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

/// A virtualized epoll instance.
///
/// Watches virtual descriptors with level-triggered, edge-triggered, and
/// one-shot readiness reporting, and passes descriptors the simulator does
/// not virtualize through to a kernel epoll. Readiness changes schedule at
/// most one deferred notification task through the simulation scheduler;
/// the task drives the owning process's continuation, which collects
/// events with [`collect`](Epoll::collect).
///
/// The instance is itself a virtual descriptor: its own status is
/// permanently active, and its readable bit mirrors whether any watched
/// source currently has a reportable event, so one epoll can watch
/// another.
///
/// Everything here is single-threaded cooperative within one simulated
/// host; the type is intentionally neither `Send` nor `Sync`.
pub struct Epoll {
    desc: Rc<Descriptor>,
    listener_id: ListenerId,
    weak: Weak<Epoll>,
    flags: Cell<Flags>,
    watches: RefCell<IndexMap<Handle, Rc<RefCell<Watch>>>>,
    os: RefCell<Option<sys::Epoll>>,
    process: Weak<dyn Process>,
    host: Weak<dyn Host>,
    scheduler: Rc<dyn Scheduler>,
}

impl Epoll {
    /// Create an epoll registered under `handle` in its host's descriptor
    /// table, owned by `process`, deferring work through `scheduler`.
    ///
    /// Fails if the kernel multiplexer for the OS passthrough side cannot
    /// be created.
    pub fn new(
        handle: Handle,
        process: Weak<dyn Process>,
        host: Weak<dyn Host>,
        scheduler: Rc<dyn Scheduler>,
    ) -> io::Result<Rc<Epoll>> {
        let os = sys::Epoll::new()?;

        let desc = Rc::new(Descriptor::new(handle));
        desc.set_status(Status::active(), true);

        Ok(Rc::new_cyclic(|weak| Epoll {
            desc,
            listener_id: ListenerId::next(),
            weak: weak.clone(),
            flags: Cell::new(Flags::empty()),
            watches: RefCell::new(IndexMap::new()),
            os: RefCell::new(Some(os)),
            process,
            host,
            scheduler,
        }))
    }

    /// The virtual descriptor representing this epoll itself.
    pub fn descriptor(&self) -> &Rc<Descriptor> {
        &self.desc
    }

    pub fn handle(&self) -> Handle {
        self.desc.handle()
    }

    pub fn is_closed(&self) -> bool {
        self.flags.get().is_closed()
    }

    /// Number of descriptors currently watched (virtual side only).
    pub fn len(&self) -> usize {
        self.watches.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.borrow().is_empty()
    }

    /// Apply a control operation to the virtual interest list.
    pub fn control(
        &self,
        op: ControlOp,
        descriptor: &Rc<Descriptor>,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        match op {
            ControlOp::Add => self.add(descriptor, token, interest, opts),
            ControlOp::Modify => self.modify(descriptor, token, interest, opts),
            ControlOp::Delete => self.delete(descriptor),
        }
    }

    /// Start watching `descriptor`. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if it is already watched.
    pub fn add(
        &self,
        descriptor: &Rc<Descriptor>,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        self.ensure_open()?;
        validate_args(interest)?;

        let handle = descriptor.handle();

        {
            let mut watches = self.watches.borrow_mut();

            if watches.contains_key(&handle) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "descriptor already registered",
                ));
            }

            let watch = Watch::new(Rc::clone(descriptor), token, interest, opts);
            watches.insert(handle, Rc::new(RefCell::new(watch)));
        }

        let listener: Weak<dyn StatusListener> = self.weak.clone();
        descriptor.subscribe(self.listener_id, listener);

        trace!("epoll {:?}: added watch for {:?}", self.handle(), handle);

        self.check();

        Ok(())
    }

    /// Replace the subscription of an existing watch. Fails with
    /// [`io::ErrorKind::NotFound`] if the descriptor is not watched.
    pub fn modify(
        &self,
        descriptor: &Rc<Descriptor>,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        self.ensure_open()?;
        validate_args(interest)?;

        let handle = descriptor.handle();

        {
            let watches = self.watches.borrow();
            let watch = watches.get(&handle).ok_or_else(not_found)?;

            watch.borrow_mut().set_subscription(token, interest, opts);
        }

        trace!("epoll {:?}: modified watch for {:?}", self.handle(), handle);

        self.check();

        Ok(())
    }

    /// Stop watching `descriptor`. Fails with [`io::ErrorKind::NotFound`]
    /// if it is not watched.
    ///
    /// Deletion is lazy with respect to any in-flight sweep: the watch is
    /// unhooked from the table and its `watching` bit cleared, but a
    /// collection snapshot that still holds it simply skips it.
    pub fn delete(&self, descriptor: &Rc<Descriptor>) -> io::Result<()> {
        self.ensure_open()?;

        let handle = descriptor.handle();

        let watch = self
            .watches
            .borrow_mut()
            .swap_remove(&handle)
            .ok_or_else(not_found)?;

        watch.borrow_mut().clear_watching();
        descriptor.unsubscribe(self.listener_id);
        drop(watch);

        trace!("epoll {:?}: deleted watch for {:?}", self.handle(), handle);

        self.check();

        Ok(())
    }

    /// Apply a control operation to the OS passthrough side. Errors from
    /// the kernel multiplexer surface unmodified.
    pub fn control_os(
        &self,
        op: ControlOp,
        fd: RawFd,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        self.ensure_open()?;

        {
            let os = self.os.borrow();
            let os = os.as_ref().ok_or_else(epoll_closed)?;

            match op {
                ControlOp::Add => os.add(fd, token, interest, opts)?,
                ControlOp::Modify => os.modify(fd, token, interest, opts)?,
                ControlOp::Delete => os.delete(fd)?,
            }
        }

        trace!("epoll {:?}: os {:?} for fd {}", self.handle(), op, fd);

        self.check();

        Ok(())
    }

    /// Collect pending events into `events`, up to its capacity.
    ///
    /// Ready virtual watches are reported first; if space remains, the
    /// kernel multiplexer is drained with a zero timeout and its events
    /// appended verbatim. An OS wait error is logged and swallowed, since
    /// the virtual events have already been written. On a closed epoll
    /// this reports nothing.
    pub fn collect(&self, events: &mut Events) -> io::Result<usize> {
        events.clear();

        if self.flags.get().is_closed() || events.capacity() == 0 {
            return Ok(0);
        }

        // Snapshot of strong refs: a continuation-driven DEL mid-sweep
        // cannot invalidate the iteration, and lazily deleted watches are
        // excluded by their cleared `watching` bit.
        let watches: Vec<Rc<RefCell<Watch>>> =
            self.watches.borrow().values().cloned().collect();

        for watch in watches {
            if events.is_full() {
                break;
            }

            let mut watch = watch.borrow_mut();

            if watch.ready() {
                events.push(watch.event());
                watch.mark_reported();
            }
        }

        if !events.is_full() {
            if let Some(os) = self.os.borrow().as_ref() {
                let mut os_events = sys::Events::with_capacity(events.capacity() - events.len());

                match os.wait(&mut os_events, Some(Duration::from_millis(0))) {
                    Ok(()) => {
                        for idx in 0..os_events.len() {
                            if events.is_full() {
                                break;
                            }

                            if let Some(event) = os_events.get(idx) {
                                events.push(event);
                            }
                        }
                    }
                    Err(err) => {
                        warn!("epoll {:?}: os wait failed: {}", self.handle(), err);
                    }
                }
            }
        }

        self.check();

        Ok(events.len())
    }

    /// Mark the epoll closed. Finalization happens now if no notification
    /// is scheduled or in flight, otherwise when the pending notify task
    /// observes the closed flag.
    pub fn close(&self) {
        let flags = self.flags.get();

        if flags.is_closed() {
            return;
        }

        self.flags.set(flags.insert(Flags::closed()));
        self.desc.set_status(Status::closed(), true);

        debug!("epoll {:?}: closed", self.handle());

        let flags = self.flags.get();
        if !flags.is_scheduled() && !flags.is_notifying() {
            self.finalize();
        }
    }

    /// Re-evaluate readiness and schedule a deferred notification if one
    /// is needed and none is pending.
    ///
    /// Returns immediately while closed (finalization will tear everything
    /// down) or while a notification is being delivered (the notify frame
    /// re-checks after the continuation returns); this is what bounds the
    /// recursion when the continuation's own I/O changes statuses.
    fn check(&self) {
        let flags = self.flags.get();

        if flags.is_closed() || flags.is_notifying() {
            return;
        }

        let ready = self.has_ready();

        // Mirror readiness into our own descriptor status for any parent
        // epoll watching this one.
        self.desc.set_status(Status::readable(), ready);

        if !ready || self.flags.get().is_scheduled() {
            return;
        }

        let process = match self.process.upgrade() {
            Some(process) => process,
            None => return,
        };

        if !process.wants_notify(self.handle()) {
            return;
        }

        let epoll = match self.weak.upgrade() {
            Some(epoll) => epoll,
            None => return,
        };

        // The task owns the epoll until it runs or is dropped.
        let task = Box::new(move || epoll.notify());

        if self.scheduler.schedule(task, NOTIFY_DELAY) {
            self.flags.set(self.flags.get().insert(Flags::scheduled()));
            debug!("epoll {:?}: notify scheduled", self.handle());
        }
    }

    /// The deferred notification task.
    fn notify(&self) {
        self.flags.set(self.flags.get().remove(Flags::scheduled()));

        let process = match self.process.upgrade() {
            Some(process) => process,
            None => {
                self.flags.set(self.flags.get().insert(Flags::closed()));
                self.finalize();
                return;
            }
        };

        if self.flags.get().is_closed() || !process.is_running() {
            self.flags.set(self.flags.get().insert(Flags::closed()));
            self.finalize();
            return;
        }

        // Anything may have happened between scheduling and now;
        // re-evaluate from scratch.
        if !self.has_ready() {
            return;
        }

        debug!("epoll {:?}: notifying", self.handle());

        self.flags.set(self.flags.get().insert(Flags::notifying()));
        process.resume();
        self.flags.set(self.flags.get().remove(Flags::notifying()));

        // A close that arrived during the continuation was deferred to
        // this frame.
        if self.flags.get().is_closed() {
            self.finalize();
            return;
        }

        self.check();
    }

    /// Tear down: unhook every watch, close the kernel multiplexer, and
    /// hand our handle back to the host. Reached exactly once, through
    /// `close` or through the last notify task.
    fn finalize(&self) {
        debug!("epoll {:?}: finalizing", self.handle());

        let watches: Vec<(Handle, Rc<RefCell<Watch>>)> =
            self.watches.borrow_mut().drain(..).collect();

        for (_, watch) in watches {
            let mut watch = watch.borrow_mut();
            watch.clear_watching();
            watch.descriptor().unsubscribe(self.listener_id);
        }

        *self.os.borrow_mut() = None;

        if let Some(host) = self.host.upgrade() {
            host.close_descriptor(self.handle());
        }
    }

    /// Is any watched source currently reportable? Virtual watches first,
    /// then the OS oracle; oracle failures read as not-ready.
    fn has_ready(&self) -> bool {
        {
            let watches = self.watches.borrow();

            for watch in watches.values() {
                if watch.borrow_mut().ready() {
                    return true;
                }
            }
        }

        match self.os.borrow().as_ref() {
            Some(os) => match os.ready_now() {
                Ok(ready) => ready,
                Err(err) => {
                    warn!("epoll {:?}: os readiness probe failed: {}", self.handle(), err);
                    false
                }
            },
            None => false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.flags.get().is_closed() {
            return Err(epoll_closed());
        }

        Ok(())
    }
}

impl StatusListener for Epoll {
    fn status_changed(&self, descriptor: Handle) {
        // Every subscribed descriptor is in the table; a stray callback is
        // a bookkeeping bug, not a recoverable condition.
        assert!(
            self.watches.borrow().contains_key(&descriptor),
            "status change for unwatched descriptor {:?}",
            descriptor
        );

        self.check();
    }
}

impl fmt::Debug for Epoll {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Epoll")
            .field("handle", &self.handle())
            .field("flags", &self.flags.get())
            .field("watches", &self.len())
            .finish()
    }
}

fn validate_args(interest: Ready) -> io::Result<()> {
    if !interest.is_readable() && !interest.is_writable() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "interest must include readable or writable",
        ));
    }

    Ok(())
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "descriptor not registered")
}

fn epoll_closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "epoll is closed")
}
