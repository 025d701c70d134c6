//! A virtualized epoll for discrete-event network simulation.
//!
//! A simulator that runs unmodified application binaries has to answer
//! `epoll` calls itself: the descriptors the application watches are
//! simulator-managed objects whose readiness is driven by virtual time, not
//! by the kernel. This crate provides that epoll core. It keeps a watch
//! table over virtual [`Descriptor`]s, reproduces level-triggered,
//! edge-triggered, and one-shot reporting, schedules at most one deferred
//! notification per instance through the simulation [`Scheduler`], and
//! transparently multiplexes the real OS descriptors the application
//! legitimately owns through a kernel epoll.
//!
//! Everything is single-threaded cooperative within one simulated host, so
//! the types here are deliberately `Rc`-based and not `Send`.
//!
//! # Example
//!
//! ```
//! use std::rc::{Rc, Weak};
//!
//! use simpoll::{
//!     Descriptor, DescriptorTable, Epoll, EpollOpt, Events, Handle, Host, Process, Ready,
//!     Scheduler, Status, Timeline, Token,
//! };
//!
//! struct App;
//!
//! impl Process for App {
//!     fn is_running(&self) -> bool {
//!         true
//!     }
//!
//!     fn wants_notify(&self, _epoll: Handle) -> bool {
//!         false
//!     }
//!
//!     fn resume(&self) {}
//! }
//!
//! struct Sim;
//!
//! impl Host for Sim {
//!     fn close_descriptor(&self, _handle: Handle) {}
//! }
//!
//! let scheduler = Rc::new(Timeline::new());
//! let process = Rc::new(App);
//! let sim = Rc::new(Sim);
//! let table = DescriptorTable::new();
//!
//! let process_dyn: Rc<dyn Process> = process.clone();
//! let host_dyn: Rc<dyn Host> = sim.clone();
//! let process_ref: Weak<dyn Process> = Rc::downgrade(&process_dyn);
//! let host_ref: Weak<dyn Host> = Rc::downgrade(&host_dyn);
//! let tasks: Rc<dyn Scheduler> = scheduler.clone();
//!
//! let epoll = Epoll::new(Handle(100), process_ref, host_ref, tasks).unwrap();
//!
//! // A simulated socket that becomes readable.
//! let socket = table.insert(|handle| Rc::new(Descriptor::new(handle)));
//! socket.set_status(Status::active(), true);
//!
//! epoll
//!     .add(&socket, Token(1), Ready::readable(), EpollOpt::empty())
//!     .unwrap();
//! socket.set_status(Status::readable(), true);
//!
//! let mut events = Events::with_capacity(8);
//! let n = epoll.collect(&mut events).unwrap();
//!
//! assert_eq!(n, 1);
//! assert_eq!(events.get(0).unwrap().token(), Token(1));
//! assert!(events.get(0).unwrap().readiness().is_readable());
//! ```

mod descriptor;
mod epoll;
mod epoll_opt;
mod event;
mod host;
mod process;
mod ready;
mod scheduler;
mod status;
mod sys;

pub use crate::descriptor::{Descriptor, Handle, ListenerId, StatusListener};
pub use crate::epoll::{ControlOp, Epoll};
pub use crate::epoll_opt::EpollOpt;
pub use crate::event::{Event, Events, Iter, Token};
pub use crate::host::{DescriptorTable, Host};
pub use crate::process::Process;
pub use crate::ready::Ready;
pub use crate::scheduler::{Scheduler, Timeline};
pub use crate::status::Status;
