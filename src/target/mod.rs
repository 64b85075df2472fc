//! The interface between the server and the execution target.
//!
//! A target is a set of cores sharing one memory, typically a simulated
//! RISC-V machine. The server drives it exclusively through this trait: no
//! other part of the crate knows how execution, registers, or memory are
//! actually realized.

/// How a core should be resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeType {
    /// Leave the core stopped.
    None,
    /// Execute a single instruction.
    Step,
    /// Run freely (in bounded quanta).
    Continue,
}

/// What kind of memory access a watchpoint observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchKind {
    Write,
    Read,
    Access,
}

/// The outcome of one resume quantum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeRes {
    /// The quantum expired without incident; the core is still running.
    None,
    /// The core trapped into a system call (RISC-V `ecall`).
    Syscall,
    /// The core was stopped by an external interrupt request.
    Interrupted,
    /// A single step completed.
    Stepped,
    /// A software breakpoint instruction was hit.
    SwBreak,
    /// A hardware breakpoint was hit.
    HwBreak,
    /// A watchpoint observed an access to `addr`.
    Watch { kind: WatchKind, addr: u64 },
    /// The wall-clock budget for this resume ran out.
    TimedOut,
    /// The target failed internally.
    Failed,
    /// The core's program exited with the given status.
    Exited(u32),
}

/// Matchpoint flavors, numbered as in `Z`/`z` packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MatchKind {
    SwBreak = 0,
    HwBreak = 1,
    WriteWatch = 2,
    ReadWatch = 3,
    AccessWatch = 4,
}

impl MatchKind {
    /// Decode the `<type>` digit of a `Z`/`z` packet.
    pub fn from_packet(b: u8) -> Option<MatchKind> {
        Some(match b {
            b'0' => MatchKind::SwBreak,
            b'1' => MatchKind::HwBreak,
            b'2' => MatchKind::WriteWatch,
            b'3' => MatchKind::ReadWatch,
            b'4' => MatchKind::AccessWatch,
            _ => return None,
        })
    }
}

/// A recoverable, request-scoped target failure.
///
/// Faults are reported to the client as `E<nn>` replies; they never tear the
/// session down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFault {
    /// The address range is not mapped / not accessible.
    Memory,
    /// No such register.
    Register,
}

/// A system call trapped by the target, ready to be forwarded to GDB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyscallArgs {
    /// The RISC-V syscall number (`a7`).
    pub num: u64,
    /// The first four argument registers (`a0`–`a3`).
    pub args: [u64; 4],
}

/// The set of operations a debuggable target must provide.
pub trait Target {
    /// Number of cores. Fixed for the lifetime of the target.
    fn num_cores(&self) -> usize;

    /// Hard-reset every core and restore the initial memory image.
    fn reset(&mut self);

    /// Read register `reg` of core `core`, in target order (x0–x31, pc).
    fn read_register(&mut self, core: usize, reg: usize) -> Result<u64, TargetFault>;

    /// Write register `reg` of core `core`.
    fn write_register(&mut self, core: usize, reg: usize, val: u64) -> Result<(), TargetFault>;

    /// Fill `dst` from memory starting at `addr`.
    ///
    /// All-or-nothing: on a fault nothing is assumed about `dst` and the
    /// server reports an error for the whole block.
    fn read_memory(&mut self, core: usize, addr: u64, dst: &mut [u8]) -> Result<(), TargetFault>;

    /// Write `src` to memory starting at `addr`. All-or-nothing.
    fn write_memory(&mut self, core: usize, addr: u64, src: &[u8]) -> Result<(), TargetFault>;

    /// Run core `core` for at most `cycles` instruction cycles.
    ///
    /// `how` is never [`ResumeType::None`]. Returns what stopped the core,
    /// or [`ResumeRes::None`] if the quantum expired with the core still
    /// runnable.
    fn resume(&mut self, core: usize, how: ResumeType, cycles: u64) -> ResumeRes;

    /// The syscall number and arguments of a core whose last resume
    /// returned [`ResumeRes::Syscall`].
    fn syscall_args(&mut self, core: usize) -> SyscallArgs;

    /// Deliver the result of a forwarded syscall (return value into `a0`,
    /// errno where the ABI puts it).
    fn set_syscall_result(&mut self, core: usize, ret: u64, errno: u64);

    /// Install a hardware matchpoint. Returns false when this target cannot
    /// implement the requested kind (the server then reports the packet as
    /// unsupported).
    fn insert_matchpoint(&mut self, kind: MatchKind, addr: u64, len: u64) -> bool;

    /// Remove a hardware matchpoint. Returns false when unsupported or not
    /// present.
    fn remove_matchpoint(&mut self, kind: MatchKind, addr: u64, len: u64) -> bool;

    /// Register/memory byte order.
    fn is_little_endian(&self) -> bool {
        true
    }

    /// Size of one general register in bytes (4 for RV32, 8 for RV64).
    fn reg_size_bytes(&self) -> usize;

    /// Number of registers in the `g` packet, in target order.
    fn num_regs(&self) -> usize;

    /// The target description XML served for
    /// `qXfer:features:read:target.xml`.
    fn target_xml(&self) -> &str;
}
