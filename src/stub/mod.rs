//! The RSP server proper: the dispatch loop and the per-packet handlers.

use std::time::Duration;

use crate::common::TargetSignal;
use crate::conn::Connection;
use crate::protocol::framer::Framer;
use crate::protocol::framer::Received;
use crate::protocol::framer::SendStatus;
use crate::protocol::packet::Packet;
use crate::target::ResumeRes;
use crate::target::Target;
use crate::target::WatchKind;

mod base;
mod breakpoints;
mod core_manager;
mod error;
mod matchpoint;
mod monitor;
mod query;
mod resume;
mod syscall;


use core_manager::CoreManager;
use matchpoint::MatchpointTable;

pub use error::Error;

/// How many instruction cycles one `continue` quantum runs before the
/// connection is polled for an interrupt.
const RUN_SAMPLE_PERIOD: u64 = 10_000;

/// What to do when GDB sends a kill (`k` / `vKill`) request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillBehaviour {
    /// Reset the target, but remain alive for the next session.
    ResetOnKill,
    /// Stop the target and return from the server loop.
    ExitOnKill,
}

/// GDB execution mode: do all cores halt together, or independently?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    AllStop,
    NonStop,
}

/// Why [`GdbServer::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// GDB detached (`D`).
    Disconnect,
    /// GDB killed the target and [`KillBehaviour::ExitOnKill`] is in force.
    Kill,
    /// The connection closed.
    ConnectionClosed,
}

bitflags::bitflags! {
    /// The features negotiated with this particular client.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct ProtocolFeatures: u8 {
        const NO_ACK_MODE = 1 << 0;
        const MULTIPROCESS = 1 << 1;
    }
}

/// Helper to construct and customize a [`GdbServer`].
pub struct GdbServerBuilder<T: Target, C: Connection> {
    conn: C,
    target: T,
    kill_behaviour: KillBehaviour,
    kill_core_on_exit: bool,
    timeout: Duration,
    packet_buffer_size: Option<usize>,
}

impl<T: Target, C: Connection> GdbServerBuilder<T, C> {
    pub fn new(conn: C, target: T) -> GdbServerBuilder<T, C> {
        GdbServerBuilder {
            conn,
            target,
            kill_behaviour: KillBehaviour::ResetOnKill,
            kill_core_on_exit: false,
            timeout: Duration::ZERO,
            packet_buffer_size: None,
        }
    }

    pub fn kill_behaviour(mut self, kill_behaviour: KillBehaviour) -> Self {
        self.kill_behaviour = kill_behaviour;
        self
    }

    /// When enabled, a core that performs an exit syscall is marked dead and
    /// disappears from the thread list. When disabled (the default) the core
    /// stays live, which reads to GDB as a fresh inferior immediately taking
    /// the place of the exited one; in practice this is the nicer GDB
    /// experience.
    pub fn kill_core_on_exit(mut self, kill_core_on_exit: bool) -> Self {
        self.kill_core_on_exit = kill_core_on_exit;
        self
    }

    /// Wall-clock budget for a `continue`. Zero (the default) disables the
    /// timeout.
    pub fn continue_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the packet buffer size. Values too small to hold a `g` reply
    /// are rounded up.
    pub fn packet_buffer_size(mut self, size: usize) -> Self {
        self.packet_buffer_size = Some(size);
        self
    }

    pub fn build(self) -> GdbServer<T, C> {
        // must fit every register ASCII-encoded, and never less than 256
        let reg_file = 2 * self.target.num_regs() * self.target.reg_size_bytes() + 1;
        let min = reg_file.max(256);
        let size = self.packet_buffer_size.unwrap_or(4096).max(min);

        let num_cores = self.target.num_cores();
        GdbServer {
            conn: self.conn,
            target: self.target,
            framer: Framer::new(),
            pkt: Packet::new(size),
            scratch: vec![0; size].into_boxed_slice(),
            matchpoints: MatchpointTable::new(),
            cores: CoreManager::new(num_cores),
            focus: 0,
            features: ProtocolFeatures::empty(),
            stop_mode: StopMode::AllStop,
            kill_behaviour: self.kill_behaviour,
            kill_core_on_exit: self.kill_core_on_exit,
            timeout: self.timeout,
            syscall_core: None,
            next_thread_info: 0,
            disconnect: None,
        }
    }
}

/// A GDB Remote Serial Protocol server bound to one connection and one
/// target.
pub struct GdbServer<T: Target, C: Connection> {
    conn: C,
    target: T,
    framer: Framer,
    /// The one packet buffer: holds the request being parsed, then the reply
    /// being assembled.
    pkt: Packet,
    /// Staging area for memory blocks (`m`/`M`/`X`), same size as `pkt`.
    scratch: Box<[u8]>,
    matchpoints: MatchpointTable,
    cores: CoreManager,
    /// Core selected by `Hg` for register/memory operations.
    focus: usize,
    features: ProtocolFeatures,
    stop_mode: StopMode,
    kill_behaviour: KillBehaviour,
    kill_core_on_exit: bool,
    /// Wall-clock budget for a continue; zero disables.
    timeout: Duration,
    /// Core whose forwarded syscall is awaiting its `F` reply.
    syscall_core: Option<usize>,
    /// Enumeration cursor for `qfThreadInfo`/`qsThreadInfo`.
    next_thread_info: usize,
    disconnect: Option<DisconnectReason>,
}

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// Build a server with default policies. See [`GdbServer::builder`] to
    /// customize them.
    pub fn new(conn: C, target: T) -> GdbServer<T, C> {
        GdbServerBuilder::new(conn, target).build()
    }

    pub fn builder(conn: C, target: T) -> GdbServerBuilder<T, C> {
        GdbServerBuilder::new(conn, target)
    }

    /// Serve RSP requests until GDB detaches, kills the session, or the
    /// connection drops.
    pub fn run(&mut self) -> Result<DisconnectReason, Error<C::Error>> {
        self.conn
            .on_session_start()
            .map_err(Error::ConnectionRead)?;

        loop {
            if let Some(reason) = self.disconnect.take() {
                return Ok(reason);
            }
            self.serve_one()?;
        }
    }

    /// Pull one packet off the wire and service it.
    fn serve_one(&mut self) -> Result<(), Error<C::Error>> {
        let no_ack = self.features.contains(ProtocolFeatures::NO_ACK_MODE);
        let received = self
            .framer
            .recv_packet(&mut self.conn, &mut self.pkt, no_ack)
            .map_err(Error::ConnectionRead)?;

        match received {
            Received::Eof => {
                info!("connection closed by peer");
                self.disconnect = Some(DisconnectReason::ConnectionClosed);
                Ok(())
            }
            Received::Interrupt => {
                // ^C outside a resume: report an interrupt stop on the
                // focused core
                debug!("<-- interrupt");
                self.cores[self.focus].set_stop_reason(ResumeRes::Interrupted);
                self.pkt.clear();
                self.build_stop_reply(self.focus)?;
                self.send_reply()
            }
            Received::Pkt => match self.dispatch() {
                Ok(()) => Ok(()),
                Err(Error::Rsp(code)) => self.send_error(code),
                Err(e) => Err(e),
            },
        }
    }

    fn dispatch(&mut self) -> Result<(), Error<C::Error>> {
        if self.pkt.is_empty() {
            return self.send_empty();
        }

        let first = self.pkt.as_bytes()[0];
        match first {
            b'!' => self.send_ok(),
            b'?' => self.handle_stop_reason(),
            b'c' | b'C' | b's' | b'S' => self.handle_legacy_resume(first),
            b'D' => self.handle_detach(),
            b'F' => self.handle_syscall_reply(),
            b'g' => self.handle_read_all_regs(),
            b'G' => self.handle_write_all_regs(),
            b'H' => self.handle_set_thread(),
            b'k' => self.handle_kill(),
            b'm' => self.handle_read_mem(),
            b'M' => self.handle_write_mem(),
            b'p' => self.handle_read_reg(),
            b'P' => self.handle_write_reg(),
            b'q' => self.handle_query(),
            b'Q' => self.handle_set(),
            b'R' => self.handle_restart(),
            b'T' => self.handle_thread_alive(),
            b'v' => self.handle_v_packet(),
            b'X' => self.handle_write_mem_bin(),
            b'Z' => self.handle_matchpoint(true),
            b'z' => self.handle_matchpoint(false),
            _ => {
                info!(
                    "unknown packet: {:?}",
                    String::from_utf8_lossy(self.pkt.as_bytes())
                );
                self.send_empty()
            }
        }
    }

    // ------------------------- reply plumbing ------------------------- //

    /// Send whatever is in the packet buffer as the reply.
    fn send_reply(&mut self) -> Result<(), Error<C::Error>> {
        let no_ack = self.features.contains(ProtocolFeatures::NO_ACK_MODE);
        let status = self
            .framer
            .send_packet(&mut self.conn, &self.pkt, no_ack)
            .map_err(Error::ConnectionWrite)?;

        if status == SendStatus::Eof {
            info!("connection closed while sending reply");
            self.disconnect = Some(DisconnectReason::ConnectionClosed);
        }
        Ok(())
    }

    /// The empty reply: "packet not recognized".
    fn send_empty(&mut self) -> Result<(), Error<C::Error>> {
        self.pkt.clear();
        self.send_reply()
    }

    fn send_ok(&mut self) -> Result<(), Error<C::Error>> {
        self.pkt.clear();
        self.pkt.put_str("OK")?;
        self.send_reply()
    }

    fn send_error(&mut self, code: u8) -> Result<(), Error<C::Error>> {
        self.pkt.clear();
        self.pkt.push(b'E')?;
        self.pkt.put_hex_byte(code)?;
        self.send_reply()
    }

    // ----------------------- shared state moves ----------------------- //

    /// Full target reset: cores, matchpoint bookkeeping, focus.
    fn reset_target(&mut self) {
        debug!("resetting target");
        self.target.reset();
        self.cores.reset();
        self.matchpoints.clear();
        self.focus = 0;
        self.syscall_core = None;
        self.next_thread_info = 0;
    }

    fn multiprocess(&self) -> bool {
        self.features.contains(ProtocolFeatures::MULTIPROCESS)
    }

    /// The signal a stored stop reason maps onto.
    fn signal_of(reason: ResumeRes) -> TargetSignal {
        match reason {
            ResumeRes::None => TargetSignal::None,
            ResumeRes::Interrupted => TargetSignal::Int,
            ResumeRes::Stepped
            | ResumeRes::SwBreak
            | ResumeRes::HwBreak
            | ResumeRes::Watch { .. }
            | ResumeRes::Syscall => TargetSignal::Trap,
            ResumeRes::TimedOut => TargetSignal::Xcpu,
            ResumeRes::Failed => TargetSignal::Usr1,
            ResumeRes::Exited(_) => TargetSignal::Unknown,
        }
    }

    /// Append the stop reply for one core to the packet buffer and mark its
    /// stop delivered. Kills the core on a reported exit when the
    /// kill-on-exit policy asks for it. Callers clear the buffer (non-stop
    /// notifications prepend `Stop:` first).
    fn build_stop_reply(&mut self, idx: usize) -> Result<(), Error<C::Error>> {
        let reason = self.cores[idx].stop_reason();
        self.cores[idx].mark_stop_reported();

        let multiprocess = self.multiprocess();
        let pid = CoreManager::core2pid(idx);

        if let ResumeRes::Exited(code) = reason {
            self.pkt.push(b'W')?;
            self.pkt.put_hex_byte(code as u8)?;
            if multiprocess {
                self.pkt.put_str(";process:")?;
                self.pkt.put_hex_num(pid as u64)?;
            }

            if self.kill_core_on_exit && self.cores.is_live(idx) {
                self.cores.kill_core(idx);
                if self.focus == idx {
                    self.focus = (0..self.cores.num_cores())
                        .find(|&i| self.cores.is_live(i))
                        .unwrap_or(0);
                }
            }
            return Ok(());
        }

        let sig = Self::signal_of(reason);
        self.pkt.push(b'T')?;
        self.pkt.put_hex_byte(sig.code())?;
        self.pkt.put_str("thread:")?;
        self.pkt.put_ptid(pid, multiprocess)?;
        self.pkt.push(b';')?;

        match reason {
            ResumeRes::SwBreak => self.pkt.put_str("swbreak:;")?,
            ResumeRes::HwBreak => self.pkt.put_str("hwbreak:;")?,
            ResumeRes::Watch { kind, addr } => {
                self.pkt.put_str(match kind {
                    WatchKind::Write => "watch:",
                    WatchKind::Read => "rwatch:",
                    WatchKind::Access => "awatch:",
                })?;
                self.pkt.put_hex_num(addr)?;
                self.pkt.push(b';')?;
            }
            ResumeRes::Syscall => {
                let num = self.target.syscall_args(idx).num;
                self.pkt.put_str("syscall_entry:")?;
                self.pkt.put_hex_num(num)?;
                self.pkt.push(b';')?;
            }
            _ => {}
        }

        Ok(())
    }

    /// `?` — why did the target stop?
    fn handle_stop_reason(&mut self) -> Result<(), Error<C::Error>> {
        self.pkt.clear();
        self.build_stop_reply(self.focus)?;
        self.send_reply()
    }

    /// `D` — detach.
    fn handle_detach(&mut self) -> Result<(), Error<C::Error>> {
        self.send_ok()?;
        if self.disconnect.is_none() {
            self.disconnect = Some(DisconnectReason::Disconnect);
        }
        Ok(())
    }

    /// `k` — kill. No reply either way.
    fn handle_kill(&mut self) -> Result<(), Error<C::Error>> {
        match self.kill_behaviour {
            KillBehaviour::ResetOnKill => self.reset_target(),
            KillBehaviour::ExitOnKill => self.disconnect = Some(DisconnectReason::Kill),
        }
        Ok(())
    }

    /// `R<hex>` — restart. No reply.
    fn handle_restart(&mut self) -> Result<(), Error<C::Error>> {
        self.reset_target();
        Ok(())
    }
}
