//! Shared rig for the integration tests: a minimal host, a process with a
//! pluggable continuation, and a deterministic timeline.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use simpoll::{
    Descriptor, DescriptorTable, Epoll, Handle, Host, Process, Scheduler, Status, Timeline,
};

pub struct TestProcess {
    running: Cell<bool>,
    wants_notify: Cell<bool>,
    resumed: Cell<usize>,
    continuation: RefCell<Option<Box<dyn Fn()>>>,
}

impl TestProcess {
    pub fn new() -> Rc<TestProcess> {
        Rc::new(TestProcess {
            running: Cell::new(true),
            wants_notify: Cell::new(true),
            resumed: Cell::new(0),
            continuation: RefCell::new(None),
        })
    }

    /// Install the closure `resume` runs, standing in for the application
    /// continuing after a notification.
    pub fn set_continuation<F: Fn() + 'static>(&self, f: F) {
        *self.continuation.borrow_mut() = Some(Box::new(f));
    }

    pub fn resumed(&self) -> usize {
        self.resumed.get()
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn set_wants_notify(&self, on: bool) {
        self.wants_notify.set(on);
    }
}

impl Process for TestProcess {
    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn wants_notify(&self, _epoll: Handle) -> bool {
        self.wants_notify.get()
    }

    fn resume(&self) {
        self.resumed.set(self.resumed.get() + 1);

        let continuation = self.continuation.borrow();
        if let Some(continuation) = continuation.as_ref() {
            continuation();
        }
    }
}

pub struct TestHost {
    pub table: DescriptorTable,
    pub closed: RefCell<Vec<Handle>>,
}

impl TestHost {
    pub fn new() -> Rc<TestHost> {
        Rc::new(TestHost {
            table: DescriptorTable::new(),
            closed: RefCell::new(Vec::new()),
        })
    }
}

impl Host for TestHost {
    fn close_descriptor(&self, handle: Handle) {
        self.closed.borrow_mut().push(handle);
        self.table.remove(handle);
    }
}

pub struct Rig {
    pub timeline: Rc<Timeline>,
    pub process: Rc<TestProcess>,
    pub host: Rc<TestHost>,
    pub epoll: Rc<Epoll>,
}

impl Rig {
    /// Insert a fresh active virtual descriptor into the host table.
    pub fn descriptor(&self) -> Rc<Descriptor> {
        let descriptor = self
            .host
            .table
            .insert(|handle| Rc::new(Descriptor::new(handle)));
        descriptor.set_status(Status::active(), true);
        descriptor
    }

    /// Create another epoll owned by the same process and host, for
    /// nested-epoll setups.
    pub fn new_epoll(&self) -> Rc<Epoll> {
        spawn_epoll(&self.host, &self.process, &self.timeline)
    }
}

pub fn rig() -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let timeline = Rc::new(Timeline::new());
    let process = TestProcess::new();
    let host = TestHost::new();
    let epoll = spawn_epoll(&host, &process, &timeline);

    Rig {
        timeline,
        process,
        host,
        epoll,
    }
}

fn spawn_epoll(
    host: &Rc<TestHost>,
    process: &Rc<TestProcess>,
    timeline: &Rc<Timeline>,
) -> Rc<Epoll> {
    let slot: RefCell<Option<Rc<Epoll>>> = RefCell::new(None);

    host.table.insert(|handle| {
        let process_dyn = Rc::clone(process) as Rc<dyn Process>;
        let host_dyn = Rc::clone(host) as Rc<dyn Host>;
        let process_ref: Weak<dyn Process> = Rc::downgrade(&process_dyn);
        let host_ref: Weak<dyn Host> = Rc::downgrade(&host_dyn);
        let scheduler: Rc<dyn Scheduler> = Rc::clone(timeline) as Rc<dyn Scheduler>;

        let epoll = Epoll::new(handle, process_ref, host_ref, scheduler).unwrap();
        let descriptor = Rc::clone(epoll.descriptor());

        *slot.borrow_mut() = Some(epoll);
        descriptor
    });

    slot.into_inner().unwrap()
}
