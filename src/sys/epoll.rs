use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::cmp;
use std::time::Duration;

use libc::{self, c_int};
use libc::{EPOLLERR, EPOLLHUP};
use libc::{EPOLLET, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLPRI};
use libc::EPOLLRDHUP;

use crate::{EpollOpt, Event, Ready, Token};

/// The kernel multiplexer backing the OS passthrough side of a virtual
/// epoll. Descriptors the simulator does not virtualize are registered
/// here verbatim.
pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;

        Ok(Epoll { epfd })
    }

    pub fn wait(&self, evts: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout
            .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let cnt = syscall!(epoll_wait(
            self.epfd,
            evts.events.as_mut_ptr(),
            evts.events.capacity() as i32,
            timeout
        ))?;

        unsafe { evts.events.set_len(cnt as usize) };

        Ok(())
    }

    pub fn add(&self, fd: RawFd, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: ioevent_to_epoll(interest, opts),
            u64: token.0 as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;

        Ok(())
    }

    pub fn modify(&self, fd: RawFd, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: ioevent_to_epoll(interest, opts),
            u64: token.0 as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;

        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;

        Ok(())
    }

    /// Nonblocking peek: is any event currently pending on this
    /// multiplexer?
    ///
    /// Registers the inner epfd with a temporary outer epoll, waits with a
    /// zero timeout, and tears the probe down again. The outer wait only
    /// observes the inner instance's readable state, so no event is
    /// consumed from it.
    pub fn ready_now(&self) -> io::Result<bool> {
        let probe = Epoll::new()?;

        probe.add(self.epfd, Token(0), Ready::readable(), EpollOpt::empty())?;

        let mut events = Events::with_capacity(1);
        let res = probe.wait(&mut events, Some(Duration::from_millis(0)));

        probe.delete(self.epfd)?;
        res?;

        Ok(!events.is_empty())
    }
}

fn ioevent_to_epoll(interest: Ready, opts: EpollOpt) -> u32 {
    let mut kind = 0;

    if interest.is_readable() {
        kind |= EPOLLIN;
    }

    if interest.is_writable() {
        kind |= EPOLLOUT;
    }

    if opts.is_edge() {
        kind |= EPOLLET;
    }

    if opts.is_oneshot() {
        kind |= EPOLLONESHOT;
    }

    kind as u32
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

pub struct Events {
    events: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(u: usize) -> Events {
        Events {
            events: Vec::with_capacity(u),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Event> {
        self.events.get(idx).map(|event| {
            let epoll = event.events as c_int;
            let mut kind = Ready::empty();

            // Errors and hangups fold into read/write readiness so the
            // caller observes them on its next I/O operation.
            if (epoll & EPOLLIN) != 0
                || (epoll & EPOLLPRI) != 0
                || (epoll & EPOLLRDHUP) != 0
                || (epoll & EPOLLHUP) != 0
                || (epoll & EPOLLERR) != 0
            {
                kind = kind | Ready::readable();
            }

            if (epoll & EPOLLOUT) != 0 || (epoll & EPOLLERR) != 0 {
                kind = kind | Ready::writable();
            }

            let token = self.events[idx].u64;

            Event::new(kind, EpollOpt::empty(), Token(token as usize))
        })
    }
}
