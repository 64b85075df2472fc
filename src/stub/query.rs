//! Handlers for the `q`/`Q` query families and the `v` packets that are not
//! resume-related.

use crate::conn::Connection;
use crate::protocol::hex;
use crate::stub::error::RspCode;
use crate::stub::CoreManager;
use crate::stub::DisconnectReason;
use crate::stub::Error;
use crate::stub::GdbServer;
use crate::stub::KillBehaviour;
use crate::stub::ProtocolFeatures;
use crate::stub::StopMode;
use crate::target::ResumeRes;
use crate::target::Target;

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// `q` packet family.
    pub(super) fn handle_query(&mut self) -> Result<(), Error<C::Error>> {
        let body = self.pkt.as_bytes();

        if let Some(rest) = strip(body, b"qSupported") {
            let multiprocess = rest
                .split(|b| *b == b';' || *b == b':')
                .any(|feat| feat == b"multiprocess+");
            return self.handle_supported(multiprocess);
        }
        if body == b"qfThreadInfo" {
            self.next_thread_info = 0;
            return self.write_next_thread_info();
        }
        if body == b"qsThreadInfo" {
            return self.write_next_thread_info();
        }
        if body == b"qC" {
            return self.handle_current_thread();
        }
        if strip(body, b"qAttached").is_some() {
            self.pkt.clear();
            self.pkt.push(b'1')?;
            return self.send_reply();
        }
        if body == b"qOffsets" {
            self.pkt.clear();
            self.pkt.put_str("Text=0;Data=0;Bss=0")?;
            return self.send_reply();
        }
        if strip(body, b"qRcmd,").is_some() {
            return self.handle_rcmd();
        }
        if let Some(rest) = strip(body, b"qXfer:features:read:") {
            let (annex, offset, len) = parse_xfer(rest)?;
            if annex != b"target.xml" {
                return Err(Error::rsp(RspCode::Proto));
            }
            return self.handle_features_read(offset, len);
        }

        info!("unknown query: {:?}", String::from_utf8_lossy(body));
        self.send_empty()
    }

    /// `qSupported` — capability handshake.
    fn handle_supported(&mut self, multiprocess: bool) -> Result<(), Error<C::Error>> {
        self.features
            .set(ProtocolFeatures::MULTIPROCESS, multiprocess);
        debug!(
            "client {} multiprocess extensions",
            if multiprocess { "supports" } else { "lacks" }
        );

        let capacity = self.pkt.capacity();
        self.pkt.clear();
        self.pkt.put_str("PacketSize=")?;
        self.pkt.put_hex_num(capacity as u64)?;
        self.pkt.put_str(concat!(
            ";multiprocess+",
            ";vContSupported+",
            ";qXfer:features:read+",
            ";swbreak+",
            ";hwbreak+",
            ";QStartNoAckMode+",
            ";QNonStop+",
        ))?;
        self.send_reply()
    }

    /// One page of `qfThreadInfo`/`qsThreadInfo`: the next live core, or `l`
    /// when the enumeration is done.
    fn write_next_thread_info(&mut self) -> Result<(), Error<C::Error>> {
        let next = (self.next_thread_info..self.cores.num_cores())
            .find(|&i| self.cores.is_live(i));

        let multiprocess = self.multiprocess();
        self.pkt.clear();
        match next {
            Some(idx) => {
                self.next_thread_info = idx + 1;
                self.pkt.push(b'm')?;
                self.pkt.put_ptid(CoreManager::core2pid(idx), multiprocess)?;
            }
            None => {
                self.next_thread_info = 0;
                self.pkt.push(b'l')?;
            }
        }
        self.send_reply()
    }

    /// `qXfer:features:read:target.xml` — serve the target description.
    fn handle_features_read(&mut self, offset: u64, len: u64) -> Result<(), Error<C::Error>> {
        let xml = self.target.target_xml().as_bytes();
        let offset = (offset as usize).min(xml.len());
        // worst case every byte escapes to two, plus the m/l marker
        let budget = (self.pkt.capacity() - 1) / 2;
        let chunk = (len as usize).min(xml.len() - offset).min(budget);

        self.pkt.clear();
        if offset + chunk < xml.len() {
            self.pkt.push(b'm')?;
        } else {
            self.pkt.push(b'l')?;
        }
        let chunk = &self.target.target_xml().as_bytes()[offset..offset + chunk];
        self.pkt.put_escaped(chunk)?;
        self.send_reply()
    }

    /// `Q` packet family — settable options.
    pub(super) fn handle_set(&mut self) -> Result<(), Error<C::Error>> {
        let body = self.pkt.as_bytes();

        if body == b"QStartNoAckMode" {
            // the OK itself is still acknowledged under the old regime
            self.send_ok()?;
            self.features.set(ProtocolFeatures::NO_ACK_MODE, true);
            debug!("no-ack mode enabled");
            return Ok(());
        }
        if let Some(rest) = strip(body, b"QNonStop:") {
            self.stop_mode = match rest {
                b"0" => StopMode::AllStop,
                b"1" => StopMode::NonStop,
                _ => return Err(Error::rsp(RspCode::Proto)),
            };
            debug!("stop mode now {:?}", self.stop_mode);
            return self.send_ok();
        }

        info!("unknown set packet: {:?}", String::from_utf8_lossy(body));
        self.send_empty()
    }

    /// `v` packet family.
    pub(super) fn handle_v_packet(&mut self) -> Result<(), Error<C::Error>> {
        let body = self.pkt.as_bytes();

        if body == b"vCont?" {
            self.pkt.clear();
            self.pkt.put_str("vCont;c;C;s;S")?;
            return self.send_reply();
        }
        if strip(body, b"vCont").is_some() {
            return self.handle_vcont();
        }
        if let Some(rest) = strip(body, b"vKill;") {
            let pid = hex::decode_value(rest).ok_or(Error::rsp(RspCode::Proto))? as usize;
            return self.handle_vkill(pid);
        }
        if let Some(rest) = strip(body, b"vAttach;") {
            let pid = hex::decode_value(rest).ok_or(Error::rsp(RspCode::Proto))? as usize;
            return self.handle_vattach(pid);
        }
        if strip(body, b"vRun").is_some() {
            return self.handle_vrun();
        }
        if body == b"vStopped" {
            return self.handle_vstopped();
        }

        // vMustReplyEmpty lands here by design, as does anything unknown
        info!("unsupported v packet: {:?}", String::from_utf8_lossy(body));
        self.send_empty()
    }

    /// `vKill;<pid>` — kill one process.
    fn handle_vkill(&mut self, pid: usize) -> Result<(), Error<C::Error>> {
        let core = self
            .cores
            .pid2core(pid)
            .ok_or(Error::rsp(RspCode::Thread))?;
        self.cores.kill_core(core);
        self.send_ok()?;

        // once the last core is gone, fall back to the kill policy
        if self.cores.live_cores() == 0 {
            match self.kill_behaviour {
                KillBehaviour::ResetOnKill => self.reset_target(),
                KillBehaviour::ExitOnKill => {
                    if self.disconnect.is_none() {
                        self.disconnect = Some(DisconnectReason::Kill);
                    }
                }
            }
        }
        Ok(())
    }

    /// `vAttach;<pid>` — focus the process and report why it is stopped.
    fn handle_vattach(&mut self, pid: usize) -> Result<(), Error<C::Error>> {
        let core = self
            .cores
            .pid2core(pid)
            .ok_or(Error::rsp(RspCode::Thread))?;
        if !self.cores.is_live(core) {
            return Err(Error::rsp(RspCode::Thread));
        }
        self.focus = core;
        self.pkt.clear();
        self.build_stop_reply(core)?;
        self.send_reply()
    }

    /// `vRun;…` — restart the target and report a fresh stop at the entry
    /// point.
    fn handle_vrun(&mut self) -> Result<(), Error<C::Error>> {
        self.reset_target();
        self.cores[self.focus].set_stop_reason(ResumeRes::Stepped);
        self.pkt.clear();
        self.build_stop_reply(self.focus)?;
        self.send_reply()
    }

    /// `vStopped` — drain pending stop events in non-stop mode.
    fn handle_vstopped(&mut self) -> Result<(), Error<C::Error>> {
        match self.cores.first_unreported_stop() {
            Some(idx) => {
                self.pkt.clear();
                self.build_stop_reply(idx)?;
                self.send_reply()
            }
            None => self.send_ok(),
        }
    }
}

/// Strip a literal prefix, returning the remainder.
fn strip<'a>(body: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    body.strip_prefix(prefix)
}

/// Parse the `<annex>:<offset>,<len>` tail of a qXfer read.
fn parse_xfer<E>(rest: &[u8]) -> Result<(&[u8], u64, u64), Error<E>> {
    let colon = rest
        .iter()
        .position(|b| *b == b':')
        .ok_or(Error::rsp(RspCode::Proto))?;
    let annex = &rest[..colon];
    let args = &rest[colon + 1..];
    let comma = args
        .iter()
        .position(|b| *b == b',')
        .ok_or(Error::rsp(RspCode::Proto))?;
    let offset = hex::decode_value(&args[..comma]).ok_or(Error::rsp(RspCode::Proto))?;
    let len = hex::decode_value(&args[comma + 1..]).ok_or(Error::rsp(RspCode::Proto))?;
    Ok((annex, offset, len))
}
