//! Scripted stand-ins for the connection and the target, used by the framer
//! and server tests.

use std::collections::VecDeque;
use std::convert::Infallible;

use crate::conn::Connection;
use crate::conn::RspByte;
use crate::protocol::hex;
use crate::target::MatchKind;
use crate::target::ResumeRes;
use crate::target::ResumeType;
use crate::target::SyscallArgs;
use crate::target::Target;
use crate::target::TargetFault;

/// Frame a payload the way a GDB client would: `$<body>#<checksum>`.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let checksum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(b'$');
    out.extend_from_slice(body);
    out.push(b'#');
    out.push(hex::to_hex(checksum >> 4));
    out.push(hex::to_hex(checksum & 0xf));
    out
}

/// A connection fed from fixed byte scripts. Reading past the script is
/// EOF; polling past it reports "no data".
///
/// Blocking reads and non-blocking polls draw from separate queues so a
/// test can stage "bytes that arrive while the target is running" (the
/// `\x03` a real client sends mid-resume) apart from the request/ack
/// stream.
pub struct ScriptedConn {
    pub input: VecDeque<u8>,
    pub poll_input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl ScriptedConn {
    pub fn new() -> ScriptedConn {
        ScriptedConn {
            input: VecDeque::new(),
            poll_input: VecDeque::new(),
            output: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn feed_poll(&mut self, bytes: &[u8]) {
        self.poll_input.extend(bytes);
    }

    /// The payloads of every packet the server has sent so far, in order.
    /// Acks and framing are stripped.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        let mut rest = &self.output[..];
        while let Some(start) = rest.iter().position(|b| *b == b'$' || *b == b'%') {
            let body = &rest[start + 1..];
            let Some(end) = body.iter().position(|b| *b == b'#') else {
                break;
            };
            payloads.push(body[..end].to_vec());
            rest = &body[end + 1..];
        }
        payloads
    }
}

impl Connection for ScriptedConn {
    type Error = Infallible;

    fn read(&mut self) -> Result<RspByte, Self::Error> {
        Ok(match self.input.pop_front() {
            None => RspByte::Eof,
            Some(0x03) => RspByte::Interrupt,
            Some(b) => RspByte::Byte(b),
        })
    }

    fn poll(&mut self) -> Result<Option<RspByte>, Self::Error> {
        Ok(match self.poll_input.pop_front() {
            None => None,
            Some(0x03) => Some(RspByte::Interrupt),
            Some(b) => Some(RspByte::Byte(b)),
        })
    }

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.output.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub const MEM_SIZE: usize = 0x10000;
pub const NUM_REGS: usize = 33;

/// A scripted target: a flat memory image, per-core register files, and a
/// queue of canned resume results.
pub struct ScriptedTarget {
    pub cores: usize,
    pub regs: Vec<[u64; NUM_REGS]>,
    pub mem: Vec<u8>,
    /// Popped once per `resume` call; an empty queue means "quantum expired,
    /// still running".
    pub resume_script: VecDeque<ResumeRes>,
    pub resume_calls: Vec<(usize, ResumeType)>,
    pub syscall: SyscallArgs,
    pub syscall_result: Option<(u64, u64)>,
    pub hw_matchpoints: Vec<(MatchKind, u64, u64)>,
    pub hw_supported: bool,
    pub resets: usize,
}

impl ScriptedTarget {
    pub fn new(cores: usize) -> ScriptedTarget {
        ScriptedTarget {
            cores,
            regs: vec![[0; NUM_REGS]; cores],
            mem: vec![0; MEM_SIZE],
            resume_script: VecDeque::new(),
            resume_calls: Vec::new(),
            syscall: SyscallArgs {
                num: 0,
                args: [0; 4],
            },
            syscall_result: None,
            hw_matchpoints: Vec::new(),
            hw_supported: true,
            resets: 0,
        }
    }
}

impl Target for ScriptedTarget {
    fn num_cores(&self) -> usize {
        self.cores
    }

    fn reset(&mut self) {
        self.resets += 1;
        for regs in &mut self.regs {
            *regs = [0; NUM_REGS];
        }
    }

    fn read_register(&mut self, core: usize, reg: usize) -> Result<u64, TargetFault> {
        self.regs[core].get(reg).copied().ok_or(TargetFault::Register)
    }

    fn write_register(&mut self, core: usize, reg: usize, val: u64) -> Result<(), TargetFault> {
        match self.regs[core].get_mut(reg) {
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(TargetFault::Register),
        }
    }

    fn read_memory(&mut self, _core: usize, addr: u64, dst: &mut [u8]) -> Result<(), TargetFault> {
        let addr = addr as usize;
        let end = addr.checked_add(dst.len()).ok_or(TargetFault::Memory)?;
        let src = self.mem.get(addr..end).ok_or(TargetFault::Memory)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write_memory(&mut self, _core: usize, addr: u64, src: &[u8]) -> Result<(), TargetFault> {
        let addr = addr as usize;
        let end = addr.checked_add(src.len()).ok_or(TargetFault::Memory)?;
        let dst = self.mem.get_mut(addr..end).ok_or(TargetFault::Memory)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn resume(&mut self, core: usize, how: ResumeType, _cycles: u64) -> ResumeRes {
        self.resume_calls.push((core, how));
        self.resume_script.pop_front().unwrap_or(ResumeRes::None)
    }

    fn syscall_args(&mut self, _core: usize) -> SyscallArgs {
        self.syscall
    }

    fn set_syscall_result(&mut self, core: usize, ret: u64, errno: u64) {
        self.syscall_result = Some((ret, errno));
        // a0 is x10
        self.regs[core][10] = ret;
    }

    fn insert_matchpoint(&mut self, kind: MatchKind, addr: u64, len: u64) -> bool {
        if !self.hw_supported {
            return false;
        }
        self.hw_matchpoints.push((kind, addr, len));
        true
    }

    fn remove_matchpoint(&mut self, kind: MatchKind, addr: u64, len: u64) -> bool {
        if !self.hw_supported {
            return false;
        }
        match self
            .hw_matchpoints
            .iter()
            .position(|mp| *mp == (kind, addr, len))
        {
            Some(i) => {
                self.hw_matchpoints.remove(i);
                true
            }
            None => false,
        }
    }

    fn reg_size_bytes(&self) -> usize {
        4
    }

    fn num_regs(&self) -> usize {
        NUM_REGS
    }

    fn target_xml(&self) -> &str {
        r#"<target version="1.0"><architecture>riscv:rv32</architecture></target>"#
    }
}
