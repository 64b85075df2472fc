//! Handlers for the core register, memory, and thread packets.

use crate::common::IdKind;
use crate::common::Ptid;
use crate::conn::Connection;
use crate::protocol::hex;
use crate::stub::error::RspCode;
use crate::stub::CoreManager;
use crate::stub::Error;
use crate::stub::GdbServer;
use crate::target::Target;

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// `g` — read every register of the focused core, concatenated in
    /// target order. Partial replies are not allowed: any fault fails the
    /// whole request.
    pub(super) fn handle_read_all_regs(&mut self) -> Result<(), Error<C::Error>> {
        let core = self.focus;
        let num_regs = self.target.num_regs();
        let size = self.target.reg_size_bytes();
        let le = self.target.is_little_endian();

        self.pkt.clear();
        for reg in 0..num_regs {
            let val = self.target.read_register(core, reg)?;
            self.pkt.put_reg(val, size, le)?;
        }
        self.send_reply()
    }

    /// `G<hex>` — write every register.
    pub(super) fn handle_write_all_regs(&mut self) -> Result<(), Error<C::Error>> {
        let core = self.focus;
        let num_regs = self.target.num_regs();
        let size = self.target.reg_size_bytes();
        let le = self.target.is_little_endian();

        let Self { pkt, target, .. } = self;
        let vals = &pkt.as_bytes()[1..];
        if vals.len() != num_regs * size * 2 {
            return Err(Error::rsp(RspCode::Length));
        }

        for reg in 0..num_regs {
            let field = &vals[reg * size * 2..(reg + 1) * size * 2];
            let val = hex::decode_reg(field, size, le).ok_or(Error::rsp(RspCode::Proto))?;
            target.write_register(core, reg, val)?;
        }
        self.send_ok()
    }

    /// `m<addr>,<len>` — read a block of memory as hex. Full block or
    /// nothing.
    pub(super) fn handle_read_mem(&mut self) -> Result<(), Error<C::Error>> {
        let (addr, len) = parse_addr_len(&self.pkt.as_bytes()[1..])?;

        // the reply needs two digits per byte
        let fits = len
            .checked_mul(2)
            .map_or(false, |n| n <= self.pkt.capacity() as u64);
        if !fits {
            return Err(Error::rsp(RspCode::Length));
        }
        let len = len as usize;

        let Self {
            target,
            scratch,
            focus,
            ..
        } = self;
        target.read_memory(*focus, addr, &mut scratch[..len])?;

        self.pkt.clear();
        self.pkt.put_hex_buf(&self.scratch[..len])?;
        self.send_reply()
    }

    /// `M<addr>,<len>:<hex>` — write a block of memory.
    pub(super) fn handle_write_mem(&mut self) -> Result<(), Error<C::Error>> {
        let colon = find(self.pkt.as_bytes(), b':').ok_or(Error::rsp(RspCode::Proto))?;
        let (addr, len) = parse_addr_len(&self.pkt.as_bytes()[1..colon])?;

        let Self {
            pkt, target, focus, ..
        } = self;
        let payload = &mut pkt.bytes_mut()[colon + 1..];
        let bytes = hex::decode_hex_buf(payload).ok_or(Error::rsp(RspCode::Proto))?;
        if bytes.len() as u64 != len {
            return Err(Error::rsp(RspCode::Length));
        }

        target.write_memory(*focus, addr, bytes)?;
        self.send_ok()
    }

    /// `X<addr>,<len>:<bin>` — binary write. The payload is escape-decoded
    /// in place first. A zero-length write is GDB probing for `X` support.
    pub(super) fn handle_write_mem_bin(&mut self) -> Result<(), Error<C::Error>> {
        let colon = find(self.pkt.as_bytes(), b':').ok_or(Error::rsp(RspCode::Proto))?;
        let (addr, len) = parse_addr_len(&self.pkt.as_bytes()[1..colon])?;

        let Self {
            pkt, target, focus, ..
        } = self;
        let payload = &mut pkt.bytes_mut()[colon + 1..];
        let unescaped = hex::unescape_in_place(payload);
        if unescaped as u64 != len {
            return Err(Error::rsp(RspCode::Length));
        }

        if len > 0 {
            let payload = &pkt.as_bytes()[colon + 1..colon + 1 + unescaped];
            target.write_memory(*focus, addr, payload)?;
        }
        self.send_ok()
    }

    /// `p<reg>` — read one register.
    pub(super) fn handle_read_reg(&mut self) -> Result<(), Error<C::Error>> {
        let reg = hex::decode_value(&self.pkt.as_bytes()[1..])
            .ok_or(Error::rsp(RspCode::Proto))? as usize;

        let val = self.target.read_register(self.focus, reg)?;
        let size = self.target.reg_size_bytes();
        let le = self.target.is_little_endian();

        self.pkt.clear();
        self.pkt.put_reg(val, size, le)?;
        self.send_reply()
    }

    /// `P<reg>=<hex>` — write one register.
    pub(super) fn handle_write_reg(&mut self) -> Result<(), Error<C::Error>> {
        let eq = find(self.pkt.as_bytes(), b'=').ok_or(Error::rsp(RspCode::Proto))?;
        let body = self.pkt.as_bytes();
        let reg =
            hex::decode_value(&body[1..eq]).ok_or(Error::rsp(RspCode::Proto))? as usize;

        let size = self.target.reg_size_bytes();
        let field = &body[eq + 1..];
        if field.len() != size * 2 {
            return Err(Error::rsp(RspCode::Length));
        }
        if !hex::is_hex_str(field) {
            return Err(Error::rsp(RspCode::Proto));
        }
        let val = hex::decode_reg(field, size, self.target.is_little_endian())
            .ok_or(Error::rsp(RspCode::Proto))?;

        self.target.write_register(self.focus, reg, val)?;
        self.send_ok()
    }

    /// `H<op><ptid>` — select the focused thread.
    pub(super) fn handle_set_thread(&mut self) -> Result<(), Error<C::Error>> {
        let body = self.pkt.as_bytes();
        let op = *body.get(1).ok_or(Error::rsp(RspCode::Proto))?;
        let ptid = Ptid::from_bytes(&body[2..]).ok_or(Error::rsp(RspCode::Proto))?;

        match op {
            // deprecated in favor of vCont; what GDB means by it is murky,
            // so accept and ignore, as the protocol suggests
            b'c' => {
                debug!("legacy Hc{:?} accepted as a no-op", ptid);
                self.send_ok()
            }
            b'g' => {
                let core = self.resolve_focus(ptid)?;
                self.focus = core;
                self.send_ok()
            }
            _ => {
                info!("unknown H op {:?}", op as char);
                self.send_empty()
            }
        }
    }

    /// Map an `Hg` ptid onto a core index.
    fn resolve_focus(&self, ptid: Ptid) -> Result<usize, Error<C::Error>> {
        if !ptid.tid.matches(1) {
            return Err(Error::rsp(RspCode::Thread));
        }
        match ptid.pid {
            // "any" means the first live core
            IdKind::Any => (0..self.cores.num_cores())
                .find(|&i| self.cores.is_live(i))
                .ok_or(Error::rsp(RspCode::Thread)),
            // "all" makes no sense for register/memory focus
            IdKind::All => Err(Error::rsp(RspCode::Thread)),
            IdKind::WithId(pid) => self
                .cores
                .pid2core(pid.get())
                .ok_or(Error::rsp(RspCode::Thread)),
        }
    }

    /// `T<ptid>` — is the thread alive?
    pub(super) fn handle_thread_alive(&mut self) -> Result<(), Error<C::Error>> {
        let ptid =
            Ptid::from_bytes(&self.pkt.as_bytes()[1..]).ok_or(Error::rsp(RspCode::Proto))?;

        let alive = match ptid.pid {
            IdKind::All | IdKind::Any => self.cores.live_cores() > 0,
            IdKind::WithId(pid) => self
                .cores
                .pid2core(pid.get())
                .is_some_and(|core| self.cores.is_live(core)),
        };

        if alive && ptid.tid.matches(1) {
            self.send_ok()
        } else {
            Err(Error::rsp(RspCode::Thread))
        }
    }

    /// `qC` — report the focused thread.
    pub(super) fn handle_current_thread(&mut self) -> Result<(), Error<C::Error>> {
        let pid = CoreManager::core2pid(self.focus);
        let multiprocess = self.multiprocess();
        self.pkt.clear();
        self.pkt.put_str("QC")?;
        self.pkt.put_ptid(pid, multiprocess)?;
        self.send_reply()
    }
}

/// Position of the first `needle` in `haystack`.
fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|b| *b == needle)
}

/// Parse the `<addr>,<len>` fields common to the memory packets.
fn parse_addr_len<E>(body: &[u8]) -> Result<(u64, u64), Error<E>> {
    let comma = find(body, b',').ok_or(Error::rsp(RspCode::Proto))?;
    let addr = hex::decode_value(&body[..comma]).ok_or(Error::rsp(RspCode::Proto))?;
    let len = hex::decode_value(&body[comma + 1..]).ok_or(Error::rsp(RspCode::Proto))?;
    Ok((addr, len))
}
