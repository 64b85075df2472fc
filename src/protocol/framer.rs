//! Reads and writes RSP frames (`$<payload>#<checksum>`), including
//! acknowledgement handling, run-length expansion, and detection of the
//! out-of-band break byte.

use crate::conn::Connection;
use crate::conn::RspByte;
use crate::protocol::hex;
use crate::protocol::packet::Packet;

/// The outcome of waiting for a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// A well-formed packet is in the buffer (and has been acknowledged).
    Pkt,
    /// The client sent the break byte between packets.
    Interrupt,
    /// The client closed the connection.
    Eof,
}

/// The outcome of sending a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// The connection closed before the packet was acknowledged.
    Eof,
}

/// The outcome of a non-blocking check for the break byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakPoll {
    Quiet,
    Break,
    Eof,
}

/// Frame-level state. One per server.
///
/// The only state carried across calls is a pending break: a `\x03` that
/// arrived while waiting for an acknowledgement is remembered and surfaced
/// by the next receive or poll.
pub struct Framer {
    pending_break: bool,
}

impl Framer {
    pub fn new() -> Framer {
        Framer {
            pending_break: false,
        }
    }

    /// Block until a well-formed packet arrives, filling `pkt` with its
    /// payload (run-length expanded, escapes left intact).
    ///
    /// The checksum is computed over the bytes as transmitted, so `*` and
    /// its count byte participate even though the expansion is what lands in
    /// the buffer. Packets with bad checksums are NAKed and dropped;
    /// oversized packets likewise.
    pub fn recv_packet<C: Connection>(
        &mut self,
        conn: &mut C,
        pkt: &mut Packet,
        no_ack: bool,
    ) -> Result<Received, C::Error> {
        if self.pending_break {
            self.pending_break = false;
            return Ok(Received::Interrupt);
        }

        'listen: loop {
            // hunt for the start of a frame
            loop {
                match conn.read()? {
                    RspByte::Byte(b'$') => break,
                    RspByte::Byte(b) => {
                        trace!("dropping noise byte {:#04x} while hunting for '$'", b)
                    }
                    RspByte::Interrupt => return Ok(Received::Interrupt),
                    RspByte::Eof => return Ok(Received::Eof),
                }
            }

            pkt.clear();
            let mut checksum = 0u8;
            let mut dropped = false;

            // body, up to the '#' trailer
            loop {
                // a 0x03 inside a frame is escaped payload, not a break
                let b = match conn.read()? {
                    RspByte::Byte(b) => b,
                    RspByte::Interrupt => 0x03,
                    RspByte::Eof => return Ok(Received::Eof),
                };

                if b == b'#' {
                    break;
                }
                checksum = checksum.wrapping_add(b);

                if b == b'*' {
                    // run-length: the next byte encodes `n - 29` extra
                    // repeats of the previous byte
                    let n = match conn.read()? {
                        RspByte::Byte(b) => b,
                        RspByte::Interrupt => 0x03,
                        RspByte::Eof => return Ok(Received::Eof),
                    };
                    checksum = checksum.wrapping_add(n);

                    let prev = match pkt.last() {
                        Some(prev) => prev,
                        None => {
                            warn!("run-length marker at start of packet");
                            dropped = true;
                            continue;
                        }
                    };
                    for _ in 0..(n as usize).saturating_sub(29) {
                        if pkt.push(prev).is_err() {
                            dropped = true;
                        }
                    }
                } else if pkt.push(b).is_err() {
                    dropped = true;
                }
            }

            // two checksum digits
            let mut trailer = [0u8; 2];
            for digit in trailer.iter_mut() {
                *digit = match conn.read()? {
                    RspByte::Byte(b) => b,
                    RspByte::Interrupt => 0x03,
                    RspByte::Eof => return Ok(Received::Eof),
                };
            }
            let expected = match (hex::from_hex(trailer[0]), hex::from_hex(trailer[1])) {
                (Some(hi), Some(lo)) => Some((hi << 4) | lo),
                _ => None,
            };

            if dropped || expected != Some(checksum) {
                if dropped {
                    warn!("dropping malformed or oversized packet");
                } else {
                    warn!(
                        "bad checksum: got {:02x?}, calculated {:02x}",
                        expected, checksum
                    );
                }
                if !no_ack {
                    conn.write(b'-')?;
                    conn.flush()?;
                }
                continue 'listen;
            }

            if !no_ack {
                conn.write(b'+')?;
                conn.flush()?;
            }
            trace!("<-- ${}#{:02x}", String::from_utf8_lossy(pkt.as_bytes()), checksum);
            return Ok(Received::Pkt);
        }
    }

    /// Send one framed packet, retransmitting until the client ACKs (unless
    /// no-ack mode has been negotiated).
    pub fn send_packet<C: Connection>(
        &mut self,
        conn: &mut C,
        pkt: &Packet,
        no_ack: bool,
    ) -> Result<SendStatus, C::Error> {
        loop {
            let checksum = pkt.checksum();
            conn.write(b'$')?;
            conn.write_all(pkt.as_bytes())?;
            conn.write(b'#')?;
            conn.write(hex::to_hex(checksum >> 4))?;
            conn.write(hex::to_hex(checksum & 0xf))?;
            conn.flush()?;
            trace!("--> ${}#{:02x}", String::from_utf8_lossy(pkt.as_bytes()), checksum);

            if no_ack {
                return Ok(SendStatus::Sent);
            }

            loop {
                match conn.read()? {
                    RspByte::Byte(b'+') => return Ok(SendStatus::Sent),
                    RspByte::Byte(b'-') => {
                        debug!("client NAK, retransmitting");
                        break;
                    }
                    RspByte::Interrupt => self.pending_break = true,
                    RspByte::Eof => return Ok(SendStatus::Eof),
                    RspByte::Byte(b) => {
                        debug!("ignoring byte {:#04x} while waiting for ack", b)
                    }
                }
            }
        }
    }

    /// Send an asynchronous notification (`%<payload>#<checksum>`). These
    /// are never acknowledged.
    pub fn send_notification<C: Connection>(
        &mut self,
        conn: &mut C,
        pkt: &Packet,
    ) -> Result<(), C::Error> {
        let checksum = pkt.checksum();
        conn.write(b'%')?;
        conn.write_all(pkt.as_bytes())?;
        conn.write(b'#')?;
        conn.write(hex::to_hex(checksum >> 4))?;
        conn.write(hex::to_hex(checksum & 0xf))?;
        conn.flush()?;
        trace!("--> %{}#{:02x}", String::from_utf8_lossy(pkt.as_bytes()), checksum);
        Ok(())
    }

    /// Non-blocking check for a pending break while target cores run. Any
    /// other pending bytes are discarded: in all-stop mode the client has no
    /// business sending packets while the target is running.
    pub fn poll_break<C: Connection>(&mut self, conn: &mut C) -> Result<BreakPoll, C::Error> {
        if self.pending_break {
            self.pending_break = false;
            return Ok(BreakPoll::Break);
        }

        loop {
            match conn.poll()? {
                None => return Ok(BreakPoll::Quiet),
                Some(RspByte::Interrupt) => return Ok(BreakPoll::Break),
                Some(RspByte::Eof) => return Ok(BreakPoll::Eof),
                Some(RspByte::Byte(b)) => {
                    warn!("discarding byte {:#04x} received while target running", b)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::frame;
    use crate::testing::ScriptedConn;

    fn recv(conn: &mut ScriptedConn) -> (Received, Packet) {
        let mut pkt = Packet::new(64);
        let got = Framer::new()
            .recv_packet(conn, &mut pkt, false)
            .expect("scripted conn cannot fail");
        (got, pkt)
    }

    #[test]
    fn accepts_good_checksum_and_acks() {
        let mut conn = ScriptedConn::new();
        conn.feed(&frame(b"OK"));

        let (got, pkt) = recv(&mut conn);
        assert_eq!(got, Received::Pkt);
        assert_eq!(pkt.as_bytes(), b"OK");
        assert_eq!(conn.output, b"+");
    }

    #[test]
    fn naks_bad_checksum_then_accepts_retransmission() {
        let mut conn = ScriptedConn::new();
        conn.feed(b"$OK#00");
        conn.feed(&frame(b"OK"));

        let (got, pkt) = recv(&mut conn);
        assert_eq!(got, Received::Pkt);
        assert_eq!(pkt.as_bytes(), b"OK");
        assert_eq!(conn.output, b"-+");
    }

    #[test]
    fn expands_run_length() {
        // "x*&" = 'x' plus ('&' - 29) = 9 extra repeats
        let body = b"x*&";
        let mut conn = ScriptedConn::new();
        conn.feed(&frame(body));

        let (got, pkt) = recv(&mut conn);
        assert_eq!(got, Received::Pkt);
        assert_eq!(pkt.as_bytes(), b"xxxxxxxxxx");
    }

    #[test]
    fn skips_noise_before_frame() {
        let mut conn = ScriptedConn::new();
        conn.feed(b"++junk");
        conn.feed(&frame(b"?"));

        let (got, pkt) = recv(&mut conn);
        assert_eq!(got, Received::Pkt);
        assert_eq!(pkt.as_bytes(), b"?");
    }

    #[test]
    fn break_byte_between_frames_is_an_interrupt() {
        let mut conn = ScriptedConn::new();
        conn.feed(&[0x03]);

        let (got, _) = recv(&mut conn);
        assert_eq!(got, Received::Interrupt);
    }

    #[test]
    fn escaped_0x03_inside_a_frame_is_data() {
        // '}' 0x03 unescapes to '#'; the frame must not be cut short
        let body = [b'X', b'}', 0x03, b'Y'];
        let mut conn = ScriptedConn::new();
        conn.feed(&frame(&body));

        let (got, pkt) = recv(&mut conn);
        assert_eq!(got, Received::Pkt);
        assert_eq!(pkt.as_bytes(), &body);
    }

    #[test]
    fn eof_is_reported() {
        let mut conn = ScriptedConn::new();
        let (got, _) = recv(&mut conn);
        assert_eq!(got, Received::Eof);
    }

    #[test]
    fn send_retransmits_on_nak() {
        let mut conn = ScriptedConn::new();
        conn.feed(b"-+");

        let mut pkt = Packet::new(64);
        pkt.put_str("OK").unwrap();
        let sent = Framer::new().send_packet(&mut conn, &pkt, false).unwrap();

        assert_eq!(sent, SendStatus::Sent);
        let one = frame(b"OK");
        let mut twice = one.clone();
        twice.extend_from_slice(&one);
        assert_eq!(conn.output, twice);
    }

    #[test]
    fn send_in_no_ack_mode_does_not_wait() {
        let mut conn = ScriptedConn::new();
        let mut pkt = Packet::new(64);
        pkt.put_str("OK").unwrap();
        let sent = Framer::new().send_packet(&mut conn, &pkt, true).unwrap();
        assert_eq!(sent, SendStatus::Sent);
        assert_eq!(conn.output, frame(b"OK"));
    }

    #[test]
    fn break_during_ack_wait_is_remembered() {
        let mut conn = ScriptedConn::new();
        conn.feed(&[0x03, b'+']);

        let mut framer = Framer::new();
        let mut pkt = Packet::new(64);
        pkt.put_str("OK").unwrap();
        assert_eq!(
            framer.send_packet(&mut conn, &pkt, false).unwrap(),
            SendStatus::Sent
        );
        assert_eq!(framer.poll_break(&mut conn).unwrap(), BreakPoll::Break);
    }

    #[test]
    fn poll_break_discards_stray_bytes() {
        let mut conn = ScriptedConn::new();
        conn.feed_poll(b"ab");
        conn.feed_poll(&[0x03]);

        let mut framer = Framer::new();
        assert_eq!(framer.poll_break(&mut conn).unwrap(), BreakPoll::Break);
        assert_eq!(framer.poll_break(&mut conn).unwrap(), BreakPoll::Quiet);
    }
}
