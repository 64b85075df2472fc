//! Traits to perform in-order, serial, byte-wise I/O with the debugger,
//! including out-of-band break detection.

mod impls;

/// A single read from the debugger connection.
///
/// The transport has no notion of packet boundaries, so the break byte is
/// reported as its own variant and the framer decides, from context, whether
/// it is an interrupt or escaped packet data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RspByte {
    /// An ordinary data byte.
    Byte(u8),
    /// The out-of-band interrupt byte (`0x03`), sent by GDB on Ctrl-C.
    Interrupt,
    /// The peer closed the connection.
    Eof,
}

/// A trait to perform in-order, serial, byte-wise I/O.
///
/// This crate implements `Connection` for [`TcpStream`](std::net::TcpStream)
/// and [`UnixStream`](std::os::unix::net::UnixStream) (on unix systems).
pub trait Connection {
    /// Transport-specific error type.
    type Error;

    /// Read a single byte, blocking until one is available.
    fn read(&mut self) -> Result<RspByte, Self::Error>;

    /// Check for a pending byte without blocking.
    ///
    /// Returns `None` when no data is available. Used between resume quanta
    /// to notice an interrupt while target cores are running.
    fn poll(&mut self) -> Result<Option<RspByte>, Self::Error>;

    /// Write a single byte.
    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Write the entire buffer, blocking until complete.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        for b in buf {
            self.write(*b)?;
        }
        Ok(())
    }

    /// Flush this Connection, ensuring that all intermediately buffered
    /// contents reach their destination.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Called once, before any packets are exchanged.
    ///
    /// The `TcpStream` impl uses this to set `TCP_NODELAY`: the protocol is
    /// many small packets, and Nagle's algorithm wrecks its latency.
    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
