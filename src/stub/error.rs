use core::fmt;
use core::fmt::Display;

use crate::protocol::packet::CapacityError;
use crate::target::TargetFault;

/// The stable `E<nn>` code space.
///
/// GDB stubs do not share a standard numbering, so this one is fixed here
/// and kept distinct per error kind to keep GDB's messages informative:
///
/// | code | meaning |
/// |------|---------|
/// | `E01` | malformed packet (framing, hex, field syntax) |
/// | `E02` | length or size mismatch |
/// | `E03` | memory fault reported by the target |
/// | `E04` | register fault reported by the target |
/// | `E05` | no such thread, or the thread is dead |
/// | `E06` | matchpoint bookkeeping failure |
/// | `E07` | operation unsupported |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RspCode {
    Proto = 1,
    Length = 2,
    Mem = 3,
    Reg = 4,
    Thread = 5,
    Matchpoint = 6,
    Unsupported = 7,
}

/// An error which may occur during a debug session.
///
/// Only session-fatal conditions surface here; protocol-level problems are
/// answered on the wire with `E<nn>` replies and the session continues.
#[derive(Debug)]
pub enum Error<C> {
    /// The connection failed while reading a request.
    ConnectionRead(C),
    /// The connection failed while writing a reply.
    ConnectionWrite(C),
    /// A reply overflowed the packet buffer. Handlers bounds-check or chunk
    /// client-driven sizes first, so this is a server bug; it ends the
    /// session.
    PacketBufferOverflow,

    // A recoverable error carrying its E<nn> code. Converted into an error
    // reply by the dispatch loop; never escapes `run()`.
    #[doc(hidden)]
    Rsp(u8),
}

impl<C> Error<C> {
    pub(crate) fn rsp(code: RspCode) -> Error<C> {
        Error::Rsp(code as u8)
    }
}

impl<C> From<CapacityError> for Error<C> {
    fn from(_: CapacityError) -> Error<C> {
        Error::PacketBufferOverflow
    }
}

impl<C> From<TargetFault> for Error<C> {
    fn from(fault: TargetFault) -> Error<C> {
        match fault {
            TargetFault::Memory => Error::rsp(RspCode::Mem),
            TargetFault::Register => Error::rsp(RspCode::Reg),
        }
    }
}

impl<C: Display> Display for Error<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionRead(e) => write!(f, "connection error while reading request: {}", e),
            Error::ConnectionWrite(e) => write!(f, "connection error while writing reply: {}", e),
            Error::PacketBufferOverflow => write!(f, "reply overflowed the packet buffer"),
            Error::Rsp(code) => write!(f, "internal error reply E{:02x} leaked out of dispatch", code),
        }
    }
}

impl<C: fmt::Debug + Display> std::error::Error for Error<C> {}
