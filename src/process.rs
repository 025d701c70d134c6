use crate::Handle;

/// The process-layer interface the epoll core drives.
///
/// An epoll belongs to exactly one process. The notification controller
/// consults `wants_notify` before scheduling a deferred notification and
/// calls `resume` from the notify task to run the application until it
/// voluntarily yields; within that continuation the application typically
/// calls [`Epoll::collect`](crate::Epoll::collect) exactly once or not at
/// all.
pub trait Process {
    /// Whether the process is still running. A notify task that finds its
    /// process dead finalizes the epoll instead of delivering.
    fn is_running(&self) -> bool;

    /// Whether the process currently cares about notifications for the
    /// given epoll handle.
    fn wants_notify(&self, epoll: Handle) -> bool;

    /// Run the process until it voluntarily yields. Synchronous relative to
    /// the caller's frame.
    fn resume(&self);
}
