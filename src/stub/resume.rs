//! The vCont machinery: action resolution, the run-until-stop loop, and
//! stop-event reporting.

use std::time::Duration;
use std::time::Instant;

use crate::common::Ptid;
use crate::conn::Connection;
use crate::protocol::framer::BreakPoll;
use crate::protocol::hex;
use crate::stub::error::RspCode;
use crate::stub::CoreManager;
use crate::stub::DisconnectReason;
use crate::stub::Error;
use crate::stub::GdbServer;
use crate::stub::StopMode;
use crate::stub::RUN_SAMPLE_PERIOD;
use crate::target::ResumeRes;
use crate::target::ResumeType;
use crate::target::Target;

/// One parsed vCont action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct VContAction {
    pub kind: ActionKind,
    /// `None` means "every thread" (an action with no thread-id).
    pub ptid: Option<Ptid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ActionKind {
    Continue,
    Step,
    Stop,
}

/// Parse the `;action[:ptid]` list of a `vCont` packet.
///
/// `C`/`S` carry a signal to deliver; the simulated targets this server
/// drives have no signal delivery, so the number is parsed and dropped.
pub(super) fn parse_vcont(body: &[u8]) -> Option<Vec<VContAction>> {
    let mut actions = Vec::new();

    for field in body.split(|b| *b == b';').skip(1) {
        let mut parts = field.split(|b| *b == b':');
        let kind = parts.next()?;
        let ptid = match parts.next() {
            Some(s) => Some(Ptid::from_bytes(s)?),
            None => None,
        };

        let kind = match kind {
            b"c" => ActionKind::Continue,
            b"s" => ActionKind::Step,
            b"t" => ActionKind::Stop,
            [b'C', sig @ ..] => {
                let sig = hex::decode_value(sig)?;
                debug!("ignoring signal {:#x} on continue", sig);
                ActionKind::Continue
            }
            [b'S', sig @ ..] => {
                let sig = hex::decode_value(sig)?;
                debug!("ignoring signal {:#x} on step", sig);
                ActionKind::Step
            }
            _ => return None,
        };

        actions.push(VContAction { kind, ptid });
    }

    if actions.is_empty() {
        return None;
    }
    Some(actions)
}

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// `vCont;<action>[:<ptid>]…` — per-thread resume.
    pub(super) fn handle_vcont(&mut self) -> Result<(), Error<C::Error>> {
        let actions =
            parse_vcont(self.pkt.as_bytes()).ok_or(Error::rsp(RspCode::Proto))?;
        self.apply_vcont_actions(&actions)?;
        self.run_until_stop()
    }

    /// Legacy `c`/`C<sig>`/`s`/`S<sig>` packets, kept for clients that skip
    /// vCont. Continue applies to every core, step to the focused one.
    pub(super) fn handle_legacy_resume(&mut self, first: u8) -> Result<(), Error<C::Error>> {
        let action = match first {
            b'c' | b'C' => VContAction {
                kind: ActionKind::Continue,
                ptid: None,
            },
            _ => VContAction {
                kind: ActionKind::Step,
                ptid: Some(Ptid::of_pid(CoreManager::core2pid(self.focus))),
            },
        };
        self.apply_vcont_actions(&[action])?;
        self.run_until_stop()
    }

    /// Resolve actions onto cores: for each live core, the first action
    /// whose ptid matches it wins. Cores with no match stay stopped.
    fn apply_vcont_actions(&mut self, actions: &[VContAction]) -> Result<(), Error<C::Error>> {
        for idx in 0..self.cores.num_cores() {
            if !self.cores.is_live(idx) {
                continue;
            }
            let pid = CoreManager::core2pid(idx);
            let action = actions
                .iter()
                .find(|a| a.ptid.map_or(true, |ptid| ptid.matches(pid)));

            match action.map(|a| a.kind) {
                Some(ActionKind::Continue) => {
                    self.cores[idx].set_resume_type(ResumeType::Continue)
                }
                Some(ActionKind::Step) => self.cores[idx].set_resume_type(ResumeType::Step),
                Some(ActionKind::Stop) => {
                    // only meaningful in non-stop mode
                    if self.stop_mode != StopMode::NonStop {
                        return Err(Error::rsp(RspCode::Proto));
                    }
                    if self.cores[idx].is_running() {
                        self.cores[idx].set_resume_type(ResumeType::None);
                    }
                    self.cores[idx].set_stop_reason(ResumeRes::Interrupted);
                }
                None => {}
            }
        }
        Ok(())
    }

    /// The heart of the state machine: interleave resume quanta with
    /// interrupt polling until some core produces a reportable stop, then
    /// service syscalls and report.
    pub(super) fn run_until_stop(&mut self) -> Result<(), Error<C::Error>> {
        let deadline = (self.timeout > Duration::ZERO).then(|| Instant::now() + self.timeout);

        loop {
            // 1. one quantum for every runnable core. A core with an
            // unreported stop is suspended until that stop is serviced.
            let mut advanced = false;
            for idx in 0..self.cores.num_cores() {
                if !self.cores.is_live(idx) || self.cores[idx].has_unreported_stop() {
                    continue;
                }
                let how = self.cores[idx].resume_type();
                let cycles = match how {
                    ResumeType::None => continue,
                    ResumeType::Step => 1,
                    ResumeType::Continue => RUN_SAMPLE_PERIOD,
                };
                advanced = true;

                let res = self.target.resume(idx, how, cycles);
                if res != ResumeRes::None {
                    trace!("core {} stopped: {:?}", idx, res);
                    // a syscall keeps its resume verb so the F reply can set
                    // the core running again
                    if res != ResumeRes::Syscall {
                        self.cores[idx].set_resume_type(ResumeType::None);
                    }
                    self.cores[idx].set_stop_reason(res);
                }
            }

            // 2. out-of-band cancellation: ^C and the wall-clock budget
            match self
                .framer
                .poll_break(&mut self.conn)
                .map_err(Error::ConnectionRead)?
            {
                BreakPoll::Quiet => {}
                BreakPoll::Break => self.cancel_running_cores(ResumeRes::Interrupted),
                BreakPoll::Eof => {
                    info!("connection closed while target running");
                    self.disconnect = Some(DisconnectReason::ConnectionClosed);
                    return Ok(());
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    debug!("continue timeout expired");
                    self.cancel_running_cores(ResumeRes::TimedOut);
                }
            }

            // 3. syscall traps are serviced before any stop reporting
            let mut awaiting_reply = false;
            while let Some(idx) = self.first_unreported_syscall() {
                if self.forward_syscall(idx)? {
                    awaiting_reply = true;
                    break;
                }
            }
            if awaiting_reply || self.disconnect.is_some() {
                return Ok(());
            }

            // 4. report, or go around again
            if self.cores.first_unreported_stop().is_some() {
                return self.report_stops();
            }
            if !advanced {
                // nothing runnable; don't spin while waiting for ^C
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Inject a stop reason into every running core. If nothing was
    /// running, the focused core takes the stop so the client always gets
    /// its reply.
    fn cancel_running_cores(&mut self, reason: ResumeRes) {
        let mut hit = false;
        for idx in 0..self.cores.num_cores() {
            if self.cores.is_live(idx) && self.cores[idx].is_running() {
                self.cores[idx].set_resume_type(ResumeType::None);
                self.cores[idx].set_stop_reason(reason);
                hit = true;
            }
        }
        if !hit {
            self.cores[self.focus].set_stop_reason(reason);
        }
    }

    fn first_unreported_syscall(&self) -> Option<usize> {
        (0..self.cores.num_cores()).find(|&i| {
            self.cores[i].has_unreported_stop()
                && self.cores[i].stop_reason() == ResumeRes::Syscall
        })
    }

    /// Deliver pending stop events to the client.
    ///
    /// All-stop: one reply for the lowest-indexed stopped core, and the rest
    /// of the world halts with it. Non-stop: one asynchronous notification
    /// per stopped core, in index order.
    fn report_stops(&mut self) -> Result<(), Error<C::Error>> {
        match self.stop_mode {
            StopMode::AllStop => {
                let idx = self
                    .cores
                    .first_unreported_stop()
                    .expect("caller checked for a pending stop");

                // the first stop halts the world
                for other in 0..self.cores.num_cores() {
                    if other == idx {
                        continue;
                    }
                    if self.cores[other].is_running() {
                        self.cores[other].set_resume_type(ResumeType::None);
                        self.cores[other].set_stop_reason(ResumeRes::Interrupted);
                    }
                    self.cores[other].mark_stop_reported();
                }

                self.focus = idx;
                self.pkt.clear();
                self.build_stop_reply(idx)?;
                self.send_reply()
            }
            StopMode::NonStop => {
                while let Some(idx) = self.cores.first_unreported_stop() {
                    self.pkt.clear();
                    self.pkt.put_str("Stop:")?;
                    self.build_stop_reply(idx)?;
                    self.framer
                        .send_notification(&mut self.conn, &self.pkt)
                        .map_err(Error::ConnectionWrite)?;
                }
                Ok(())
            }
        }
    }
}
