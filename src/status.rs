use std::{fmt, ops};

/// The status bits of a virtual descriptor.
///
/// Status is driven by the simulation, not the OS: the object backing a
/// descriptor flips these bits as its simulated state changes, and watchers
/// derive readiness from them. `ACTIVE` means the descriptor is initialized
/// and operational; `CLOSED` means it has been shut down and suppresses all
/// reporting.
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Status(usize);

const ACTIVE: usize   = 0b0001;
const READABLE: usize = 0b0010;
const WRITABLE: usize = 0b0100;
const CLOSED: usize   = 0b1000;

impl Status {
    #[inline]
    pub fn empty() -> Status {
        Status(0)
    }

    #[inline]
    pub fn active() -> Status {
        Status(ACTIVE)
    }

    #[inline]
    pub fn readable() -> Status {
        Status(READABLE)
    }

    #[inline]
    pub fn writable() -> Status {
        Status(WRITABLE)
    }

    #[inline]
    pub fn closed() -> Status {
        Status(CLOSED)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Status::empty()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.contains(Status::active())
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(Status::readable())
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(Status::writable())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.contains(Status::closed())
    }

    #[inline]
    pub fn insert(&mut self, other: Status) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Status) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn contains(&self, other: Status) -> bool {
        (*self & other) == other
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl ops::BitOr for Status {
    type Output = Status;

    #[inline]
    fn bitor(self, other: Status) -> Status {
        Status(self.0 | other.0)
    }
}

impl ops::BitXor for Status {
    type Output = Status;

    #[inline]
    fn bitxor(self, other: Status) -> Status {
        Status(self.0 ^ other.0)
    }
}

impl ops::BitAnd for Status {
    type Output = Status;

    #[inline]
    fn bitand(self, other: Status) -> Status {
        Status(self.0 & other.0)
    }
}

impl ops::Sub for Status {
    type Output = Status;

    #[inline]
    fn sub(self, other: Status) -> Status {
        Status(self.0 & !other.0)
    }
}

impl From<usize> for Status {
    fn from(status: usize) -> Status {
        Status(status)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Status::active(), "Active"),
            (Status::readable(), "Readable"),
            (Status::writable(), "Writable"),
            (Status::closed(), "Closed"),
        ];

        write!(fmt, "Status {{")?;

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
