//! `Z`/`z` matchpoint handlers.
//!
//! Software breakpoints are planted by the server itself: the original
//! instruction is read out, recorded in the matchpoint registry, and
//! overwritten with a trap. Hardware breakpoints and watchpoints are the
//! target's problem; the server only relays them.

use crate::conn::Connection;
use crate::protocol::hex;
use crate::stub::error::RspCode;
use crate::stub::Error;
use crate::stub::GdbServer;
use crate::target::MatchKind;
use crate::target::Target;

/// RISC-V EBREAK.
const EBREAK: u32 = 0x0010_0073;
/// Compressed C.EBREAK, for 2-byte slots.
const C_EBREAK: u32 = 0x9002;

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// `Z<type>,<addr>,<kind>` / `z<type>,<addr>,<kind>`.
    pub(super) fn handle_matchpoint(&mut self, insert: bool) -> Result<(), Error<C::Error>> {
        let body = self.pkt.as_bytes();

        let kind = match body.get(1).copied().and_then(MatchKind::from_packet) {
            Some(kind) => kind,
            None => {
                warn!("unknown matchpoint type in {:?}", String::from_utf8_lossy(body));
                return self.send_empty();
            }
        };
        if body.get(2) != Some(&b',') {
            return Err(Error::rsp(RspCode::Proto));
        }
        let (addr, len) = {
            let args = &body[3..];
            let comma = args
                .iter()
                .position(|b| *b == b',')
                .ok_or(Error::rsp(RspCode::Proto))?;
            let addr = hex::decode_value(&args[..comma]).ok_or(Error::rsp(RspCode::Proto))?;
            let len = hex::decode_value(&args[comma + 1..]).ok_or(Error::rsp(RspCode::Proto))?;
            (addr, len)
        };

        match kind {
            MatchKind::SwBreak if insert => self.insert_sw_break(addr, len),
            MatchKind::SwBreak => self.remove_sw_break(addr, len),
            _ => {
                // hardware flavors: ask the target
                let supported = if insert {
                    self.target.insert_matchpoint(kind, addr, len)
                } else {
                    self.target.remove_matchpoint(kind, addr, len)
                };
                if supported {
                    self.send_ok()
                } else {
                    self.send_empty()
                }
            }
        }
    }

    /// Plant a software breakpoint: save the original instruction, write
    /// the trap. Re-inserting an existing breakpoint is a success and
    /// leaves memory alone (it already holds the trap).
    fn insert_sw_break(&mut self, addr: u64, len: u64) -> Result<(), Error<C::Error>> {
        let trap = trap_instr(len).ok_or(Error::rsp(RspCode::Length))?;

        if self.matchpoints.lookup(MatchKind::SwBreak, addr, len).is_some() {
            return self.send_ok();
        }

        let size = len as usize;
        let mut bytes = [0u8; 4];
        self.target
            .read_memory(self.focus, addr, &mut bytes[..size])?;
        let orig = instr_of_bytes(&bytes[..size], self.target.is_little_endian());

        let trap_bytes = bytes_of_instr(trap, size, self.target.is_little_endian());
        self.target
            .write_memory(self.focus, addr, &trap_bytes[..size])?;

        self.matchpoints.insert(MatchKind::SwBreak, addr, len, orig);
        debug!("sw break at {:#x} (saved {:#010x})", addr, orig);
        self.send_ok()
    }

    /// Remove a software breakpoint, restoring the saved instruction.
    fn remove_sw_break(&mut self, addr: u64, len: u64) -> Result<(), Error<C::Error>> {
        let orig = self
            .matchpoints
            .remove(MatchKind::SwBreak, addr, len)
            .ok_or(Error::rsp(RspCode::Matchpoint))?;

        let size = len as usize;
        let bytes = bytes_of_instr(orig, size, self.target.is_little_endian());
        self.target
            .write_memory(self.focus, addr, &bytes[..size])?;

        debug!("sw break at {:#x} removed (restored {:#010x})", addr, orig);
        self.send_ok()
    }
}

/// The trap instruction for a breakpoint slot of `len` bytes.
fn trap_instr(len: u64) -> Option<u32> {
    match len {
        2 => Some(C_EBREAK),
        4 => Some(EBREAK),
        _ => None,
    }
}

fn instr_of_bytes(bytes: &[u8], little_endian: bool) -> u32 {
    let mut word = [0u8; 4];
    if little_endian {
        word[..bytes.len()].copy_from_slice(bytes);
        u32::from_le_bytes(word)
    } else {
        word[4 - bytes.len()..].copy_from_slice(bytes);
        u32::from_be_bytes(word)
    }
}

fn bytes_of_instr(instr: u32, len: usize, little_endian: bool) -> [u8; 4] {
    let mut out = [0u8; 4];
    if little_endian {
        out.copy_from_slice(&instr.to_le_bytes());
    } else {
        // keep the instruction in the low `len` bytes of the slot
        let shifted = instr << (8 * (4 - len));
        out.copy_from_slice(&shifted.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instr_byte_round_trip_le() {
        let bytes = bytes_of_instr(EBREAK, 4, true);
        assert_eq!(&bytes, &[0x73, 0x00, 0x10, 0x00]);
        assert_eq!(instr_of_bytes(&bytes, true), EBREAK);

        let bytes = bytes_of_instr(C_EBREAK, 2, true);
        assert_eq!(&bytes[..2], &[0x02, 0x90]);
        assert_eq!(instr_of_bytes(&bytes[..2], true), C_EBREAK);
    }

    #[test]
    fn trap_sizes() {
        assert_eq!(trap_instr(4), Some(EBREAK));
        assert_eq!(trap_instr(2), Some(C_EBREAK));
        assert_eq!(trap_instr(3), None);
    }
}
