use core::num::NonZeroUsize;

use btoi::btou_radix;

/// Pid/Tid selector, as used in thread-id packet fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
    /// All processes / threads (`-1`).
    All,
    /// Any process / thread (`0`).
    Any,
    /// A specific id (id ≥ 1).
    WithId(NonZeroUsize),
}

impl IdKind {
    fn from_bytes(s: &[u8]) -> Option<IdKind> {
        match s {
            b"-1" => Some(IdKind::All),
            b"0" => Some(IdKind::Any),
            id => Some(IdKind::WithId(NonZeroUsize::new(
                btou_radix(id, 16).ok()?,
            )?)),
        }
    }

    /// Does this selector match the concrete id `id`?
    pub fn matches(self, id: usize) -> bool {
        match self {
            IdKind::All | IdKind::Any => true,
            IdKind::WithId(n) => n.get() == id,
        }
    }
}

/// A process/thread identifier pair.
///
/// Each target core is presented as one process (`pid = core index + 1`)
/// holding exactly one thread (`tid = 1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ptid {
    pub pid: IdKind,
    pub tid: IdKind,
}

impl Ptid {
    /// A concrete ptid for one core's only thread.
    pub fn of_pid(pid: usize) -> Ptid {
        let pid = NonZeroUsize::new(pid).expect("pids start at 1");
        Ptid {
            pid: IdKind::WithId(pid),
            tid: IdKind::WithId(NonZeroUsize::MIN),
        }
    }

    /// Parse a thread-id field: `p<pid>.<tid>`, `p<pid>`, or a bare id.
    ///
    /// A bare id names one of the server's processes (clients that have not
    /// negotiated `multiprocess+` see the per-core processes as plain thread
    /// numbers), so it is taken as the pid with the sole tid implied.
    pub fn from_bytes(s: &[u8]) -> Option<Ptid> {
        match s {
            [b'p', s @ ..] => {
                let mut s = s.split(|b| *b == b'.');
                let pid = IdKind::from_bytes(s.next()?)?;
                let tid = match s.next() {
                    Some(s) => IdKind::from_bytes(s)?,
                    // sending only `p<pid>` is valid
                    None => IdKind::All,
                };
                Some(Ptid { pid, tid })
            }
            _ => {
                let pid = IdKind::from_bytes(s)?;
                let tid = match pid {
                    IdKind::All => IdKind::All,
                    _ => IdKind::Any,
                };
                Some(Ptid { pid, tid })
            }
        }
    }

    /// Does this (possibly wildcarded) ptid select the single thread of the
    /// process `pid`?
    pub fn matches(self, pid: usize) -> bool {
        self.pid.matches(pid) && self.tid.matches(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_multiprocess() {
        let ptid = Ptid::from_bytes(b"p2.1").unwrap();
        assert!(ptid.matches(2));
        assert!(!ptid.matches(1));
    }

    #[test]
    fn parse_wildcards() {
        assert_eq!(
            Ptid::from_bytes(b"p-1.-1").unwrap(),
            Ptid {
                pid: IdKind::All,
                tid: IdKind::All
            }
        );
        assert!(Ptid::from_bytes(b"-1").unwrap().matches(7));
        assert!(Ptid::from_bytes(b"0").unwrap().matches(3));
    }

    #[test]
    fn parse_bare_id_is_a_pid() {
        let ptid = Ptid::from_bytes(b"a").unwrap();
        assert!(ptid.matches(10));
        assert!(!ptid.matches(1));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Ptid::from_bytes(b"p1.zz"), None);
        assert_eq!(Ptid::from_bytes(b""), None);
    }

    #[test]
    fn tid_other_than_one_matches_nothing() {
        let ptid = Ptid::from_bytes(b"p1.2").unwrap();
        assert!(!ptid.matches(1));
    }
}
