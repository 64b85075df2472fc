//! Forwarding of target system calls to the client via the GDB File-I/O
//! extension (`F` packets).

use crate::conn::Connection;
use crate::protocol::hex;
use crate::stub::error::RspCode;
use crate::stub::Error;
use crate::stub::GdbServer;
use crate::target::ResumeRes;
use crate::target::ResumeType;
use crate::target::SyscallArgs;
use crate::target::Target;

// RISC-V newlib syscall numbers, as used by the simulated targets.
const SYS_CLOSE: u64 = 57;
const SYS_LSEEK: u64 = 62;
const SYS_READ: u64 = 63;
const SYS_WRITE: u64 = 64;
const SYS_FSTAT: u64 = 80;
const SYS_EXIT: u64 = 93;
const SYS_GETTIMEOFDAY: u64 = 169;
const SYS_OPEN: u64 = 1024;
const SYS_UNLINK: u64 = 1026;

/// newlib's ENOSYS, handed back for syscalls we cannot forward.
const ENOSYS: u64 = 88;
/// newlib's EFAULT, for string arguments we cannot read.
const EFAULT: u64 = 14;

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// Service one trapped syscall. Returns true when an `F` request went
    /// out and the run loop must suspend until the client replies; false
    /// when the call was resolved locally (exit, or answered on the
    /// target's behalf) and the loop may carry on.
    pub(super) fn forward_syscall(&mut self, idx: usize) -> Result<bool, Error<C::Error>> {
        assert!(
            self.syscall_core.is_none(),
            "syscall trap while another syscall is in flight"
        );

        let SyscallArgs { num, args } = self.target.syscall_args(idx);
        self.cores[idx].mark_stop_reported();

        if num == SYS_EXIT {
            debug!("core {} exited with status {}", idx, args[0]);
            self.cores[idx].set_resume_type(ResumeType::None);
            self.cores[idx].set_stop_reason(ResumeRes::Exited(args[0] as u32));
            return Ok(false);
        }

        self.pkt.clear();
        match num {
            SYS_WRITE => {
                self.pkt.put_str("Fwrite,")?;
                self.put_args(&args[..3])?;
            }
            SYS_READ => {
                self.pkt.put_str("Fread,")?;
                self.put_args(&args[..3])?;
            }
            SYS_CLOSE => {
                self.pkt.put_str("Fclose,")?;
                self.put_args(&args[..1])?;
            }
            SYS_LSEEK => {
                self.pkt.put_str("Flseek,")?;
                self.put_args(&args[..3])?;
            }
            SYS_FSTAT => {
                self.pkt.put_str("Ffstat,")?;
                self.put_args(&args[..2])?;
            }
            SYS_GETTIMEOFDAY => {
                self.pkt.put_str("Fgettimeofday,")?;
                self.put_args(&args[..2])?;
            }
            SYS_OPEN | SYS_UNLINK => {
                // the path argument travels as pointer/length, length
                // counting the trailing NUL
                let len = match self.string_length(idx, args[0]) {
                    Some(len) => len + 1,
                    None => {
                        warn!("unreadable path argument at {:#x}", args[0]);
                        self.target.set_syscall_result(idx, u64::MAX, EFAULT);
                        return Ok(false);
                    }
                };
                self.pkt
                    .put_str(if num == SYS_OPEN { "Fopen," } else { "Funlink," })?;
                self.pkt.put_hex_num(args[0])?;
                self.pkt.push(b'/')?;
                self.pkt.put_hex_num(len)?;
                if num == SYS_OPEN {
                    self.pkt.push(b',')?;
                    self.put_args(&args[1..3])?;
                }
            }
            other => {
                // no File-I/O mapping: answer for the target and keep going
                warn!(
                    "unhandled syscall {} from core {}; answering ENOSYS",
                    other, idx
                );
                self.target.set_syscall_result(idx, u64::MAX, ENOSYS);
                return Ok(false);
            }
        }

        debug!(
            "--> {} (core {})",
            String::from_utf8_lossy(self.pkt.as_bytes()),
            idx
        );
        self.syscall_core = Some(idx);
        self.send_reply()?;
        Ok(true)
    }

    /// Comma-separated hex argument list.
    fn put_args(&mut self, args: &[u64]) -> Result<(), Error<C::Error>> {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.pkt.push(b',')?;
            }
            self.pkt.put_hex_num(*arg)?;
        }
        Ok(())
    }

    /// Length of the NUL-terminated string at `addr`, not counting the NUL.
    /// `None` when the string is unreadable or unterminated within the
    /// packet-buffer bound.
    fn string_length(&mut self, idx: usize, addr: u64) -> Option<u64> {
        let mut len = 0u64;
        let mut byte = [0u8];
        while len < self.scratch.len() as u64 {
            self.target
                .read_memory(idx, addr.checked_add(len)?, &mut byte)
                .ok()?;
            if byte[0] == 0 {
                return Some(len);
            }
            len += 1;
        }
        None
    }

    /// `F<retcode>[,<errno>[,C]]` — the client's reply to a forwarded
    /// syscall. Writes the result into the target and sets the trapped core
    /// running again.
    pub(super) fn handle_syscall_reply(&mut self) -> Result<(), Error<C::Error>> {
        let Some(idx) = self.syscall_core.take() else {
            warn!("F packet with no syscall in flight");
            return self.send_empty();
        };

        let body = &self.pkt.as_bytes()[1..];
        let mut fields = body.split(|b| *b == b',');

        let ret = fields.next().ok_or(Error::rsp(RspCode::Proto))?;
        let ret = match ret.strip_prefix(b"-") {
            Some(mag) => {
                let mag = hex::decode_value(mag).ok_or(Error::rsp(RspCode::Proto))?;
                mag.wrapping_neg()
            }
            None => hex::decode_value(ret).ok_or(Error::rsp(RspCode::Proto))?,
        };
        let errno = match fields.next() {
            Some(f) => hex::decode_value(f).ok_or(Error::rsp(RspCode::Proto))?,
            None => 0,
        };
        let interrupted = matches!(fields.next(), Some(f) if f == b"C");

        self.target.set_syscall_result(idx, ret, errno);
        if interrupted {
            // the client hit ^C while the syscall was outstanding
            self.cores[idx].set_resume_type(ResumeType::None);
            self.cores[idx].set_stop_reason(ResumeRes::Interrupted);
        }

        // no reply packet: an F request is answered by resuming. The core
        // kept its resume verb, so the loop picks it straight back up.
        self.run_until_stop()
    }
}
