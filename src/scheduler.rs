use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// The simulation scheduler the epoll core defers work through.
///
/// `schedule` queues `task` to run `delay` virtual time units from now and
/// returns whether the task was accepted. A task that is never run must
/// still be dropped eventually; resources owned by the closure are released
/// either way.
pub trait Scheduler {
    fn schedule(&self, task: Box<dyn FnOnce()>, delay: u64) -> bool;
}

struct Entry {
    at: u64,
    seq: u64,
    task: Box<dyn FnOnce()>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reverse so the earliest (at, seq) pops
    // first and equal deadlines run in submission order.
    fn cmp(&self, other: &Entry) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A deterministic single-threaded task timeline.
///
/// Virtual time only advances when a task is run; nothing here blocks or
/// consults a real clock. This is the in-crate stand-in for a full
/// simulation scheduler and the driver the tests use.
pub struct Timeline {
    now: Cell<u64>,
    seq: Cell<u64>,
    queue: RefCell<BinaryHeap<Entry>>,
}

impl Timeline {
    pub fn new() -> Timeline {
        Timeline {
            now: Cell::new(0),
            seq: Cell::new(0),
            queue: RefCell::new(BinaryHeap::new()),
        }
    }

    /// The current virtual time.
    pub fn now(&self) -> u64 {
        self.now.get()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Pop and run the earliest task, advancing virtual time to its
    /// deadline. Returns false when the queue is empty.
    pub fn run_next(&self) -> bool {
        let entry = self.queue.borrow_mut().pop();

        match entry {
            Some(entry) => {
                self.now.set(self.now.get().max(entry.at));
                (entry.task)();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue drains.
    ///
    /// An application that leaves level-triggered readiness pending and
    /// keeps wanting notifications re-arms itself forever; drive such
    /// setups with bounded [`run_next`](Timeline::run_next) calls instead.
    pub fn run_until_idle(&self) {
        while self.run_next() {}
    }
}

impl Scheduler for Timeline {
    fn schedule(&self, task: Box<dyn FnOnce()>, delay: u64) -> bool {
        let seq = self.seq.get();
        self.seq.set(seq + 1);

        self.queue.borrow_mut().push(Entry {
            at: self.now.get() + delay,
            seq,
            task,
        });

        true
    }
}

impl Default for Timeline {
    fn default() -> Timeline {
        Timeline::new()
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Timeline {{ now: {}, pending: {} }}",
            self.now(),
            self.pending()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn runs_in_deadline_then_submission_order() {
        let timeline = Timeline::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for (name, delay) in [("late", 5u64), ("first", 1), ("second", 1)] {
            let order = Rc::clone(&order);
            timeline.schedule(Box::new(move || order.borrow_mut().push(name)), delay);
        }

        assert_eq!(timeline.pending(), 3);
        timeline.run_until_idle();
        assert_eq!(*order.borrow(), vec!["first", "second", "late"]);
        assert_eq!(timeline.now(), 5);
    }

    #[test]
    fn running_task_may_schedule_followups() {
        let timeline = Rc::new(Timeline::new());
        let ran = Rc::new(Cell::new(0));

        let inner_timeline = Rc::clone(&timeline);
        let inner_ran = Rc::clone(&ran);
        timeline.schedule(
            Box::new(move || {
                inner_ran.set(inner_ran.get() + 1);

                let ran = Rc::clone(&inner_ran);
                inner_timeline.schedule(Box::new(move || ran.set(ran.get() + 1)), 2);
            }),
            1,
        );

        assert!(timeline.run_next());
        assert_eq!(timeline.pending(), 1);
        assert!(timeline.run_next());
        assert!(!timeline.run_next());

        assert_eq!(ran.get(), 2);
        assert_eq!(timeline.now(), 3);
    }
}
