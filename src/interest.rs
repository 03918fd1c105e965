use std::fmt;
use std::num::NonZeroU8;
use std::ops;

/// The event-interest mask a [`Channel`](crate::Channel) registers with the
/// [`Poller`](crate::Poller): `kNone | kReading | kWriting` in §3's terms,
/// generalized to a composable bitset the way mio's `Interests` type does.
///
/// `Interest` itself is never "none" — a channel with no interest is
/// represented by the channel simply not being registered (`disableAll`
/// followed by `remove`), matching §4.3's invariant that the last
/// `remove()` happens after `disableAll()`.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

const READABLE: u8 = 0b001;
const WRITABLE: u8 = 0b010;
const PRIORITY: u8 = 0b100;

impl Interest {
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });
    pub const PRIORITY: Interest = Interest(unsafe { NonZeroU8::new_unchecked(PRIORITY) });

    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU8::new_unchecked(self.0.get() | other.0.get()) })
    }

    pub const fn remove(self, other: Interest) -> Option<Interest> {
        match NonZeroU8::new(self.0.get() & !other.0.get()) {
            Some(v) => Some(Interest(v)),
            None => None,
        }
    }

    pub const fn is_readable(self) -> bool {
        self.0.get() & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0.get() & WRITABLE != 0
    }

    pub const fn is_priority(self) -> bool {
        self.0.get() & PRIORITY != 0
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        *self = *self | rhs;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        macro_rules! flag {
            ($name:literal, $test:expr) => {
                if $test {
                    if !first {
                        write!(f, " | ")?;
                    }
                    write!(f, $name)?;
                    first = false;
                }
            };
        }
        flag!("READABLE", self.is_readable());
        flag!("WRITABLE", self.is_writable());
        flag!("PRIORITY", self.is_priority());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_and_query() {
        let i = Interest::READABLE | Interest::WRITABLE;
        assert!(i.is_readable());
        assert!(i.is_writable());
        assert!(!i.is_priority());
    }

    #[test]
    fn remove_can_empty() {
        let i = Interest::READABLE;
        assert!(i.remove(Interest::READABLE).is_none());
        let i2 = Interest::READABLE | Interest::WRITABLE;
        assert_eq!(i2.remove(Interest::READABLE), Some(Interest::WRITABLE));
    }
}
