use std::net::TcpStream;

use crate::conn::Connection;
use crate::conn::RspByte;

fn classify(byte: u8) -> RspByte {
    if byte == 0x03 {
        RspByte::Interrupt
    } else {
        RspByte::Byte(byte)
    }
}

impl Connection for TcpStream {
    type Error = std::io::Error;

    fn read(&mut self) -> Result<RspByte, Self::Error> {
        use std::io::Read;

        self.set_nonblocking(false)?;

        let mut buf = [0u8];
        match Read::read(self, &mut buf) {
            Ok(0) => Ok(RspByte::Eof),
            Ok(_) => Ok(classify(buf[0])),
            Err(e) => Err(e),
        }
    }

    fn poll(&mut self) -> Result<Option<RspByte>, Self::Error> {
        use std::io::Read;

        self.set_nonblocking(true)?;

        let mut buf = [0u8];
        match Read::read(self, &mut buf) {
            Ok(0) => Ok(Some(RspByte::Eof)),
            Ok(_) => Ok(Some(classify(buf[0]))),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        use std::io::Write;

        Write::write_all(self, &[byte])
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        use std::io::Write;

        Write::write_all(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        use std::io::Write;

        Write::flush(self)
    }

    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        // the protocol is lots of tiny packets; Nagle's algorithm kills it
        self.set_nodelay(true)
    }
}
