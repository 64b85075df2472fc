//! An implementation of the server side of the [GDB Remote Serial
//! Protocol](https://sourceware.org/gdb/current/onlinedocs/gdb/Remote-Protocol.html)
//! (RSP), designed to sit between a `gdb` client and a simulated multi-core
//! RISC-V target.
//!
//! The server owns a [`Connection`](conn::Connection) (typically a
//! `TcpStream`) and a [`Target`](target::Target) (the simulated CPU), and
//! mediates between the two: it parses RSP packets, reads and writes
//! registers and memory, installs and removes matchpoints, resumes and steps
//! cores, forwards target-initiated system calls to the client via the GDB
//! File-I/O extension, and reports stop events.
//!
//! Each target core is presented to GDB as a separate process (`pid = core
//! index + 1`) with a single thread, which lets a stock `gdb` client inspect
//! every core through the multiprocess extensions.
//!
//! ```no_run
//! use riscv_gdbserver::{GdbServer, KillBehaviour};
//! # use riscv_gdbserver::target::{MatchKind, ResumeRes, ResumeType, SyscallArgs, Target, TargetFault};
//! # struct Sim;
//! # impl Target for Sim {
//! #     fn num_cores(&self) -> usize { 1 }
//! #     fn reset(&mut self) {}
//! #     fn read_register(&mut self, _: usize, _: usize) -> Result<u64, TargetFault> { Ok(0) }
//! #     fn write_register(&mut self, _: usize, _: usize, _: u64) -> Result<(), TargetFault> { Ok(()) }
//! #     fn read_memory(&mut self, _: usize, _: u64, _: &mut [u8]) -> Result<(), TargetFault> { Ok(()) }
//! #     fn write_memory(&mut self, _: usize, _: u64, _: &[u8]) -> Result<(), TargetFault> { Ok(()) }
//! #     fn resume(&mut self, _: usize, _: ResumeType, _: u64) -> ResumeRes { ResumeRes::Stepped }
//! #     fn syscall_args(&mut self, _: usize) -> SyscallArgs { SyscallArgs { num: 0, args: [0; 4] } }
//! #     fn set_syscall_result(&mut self, _: usize, _: u64, _: u64) {}
//! #     fn insert_matchpoint(&mut self, _: MatchKind, _: u64, _: u64) -> bool { false }
//! #     fn remove_matchpoint(&mut self, _: MatchKind, _: u64, _: u64) -> bool { false }
//! #     fn reg_size_bytes(&self) -> usize { 4 }
//! #     fn num_regs(&self) -> usize { 33 }
//! #     fn target_xml(&self) -> &str { r#"<target version="1.0"/>"# }
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (stream, _) = std::net::TcpListener::bind("127.0.0.1:3333")?.accept()?;
//!
//! let mut server = GdbServer::builder(stream, Sim)
//!     .kill_behaviour(KillBehaviour::ResetOnKill)
//!     .build();
//!
//! let reason = server.run()?;
//! eprintln!("session over: {:?}", reason);
//! # Ok(())
//! # }
//! ```
//!
//! The server is single-threaded and cooperative: target cores are advanced
//! one bounded quantum at a time, with the connection polled for GDB's
//! out-of-band interrupt byte between quanta. If the host application needs
//! concurrency it must serialize access around the server.

#[macro_use]
extern crate log;

pub mod common;
pub mod conn;
pub mod target;

mod protocol;
mod stub;

#[cfg(test)]
pub(crate) mod testing;

pub use stub::DisconnectReason;
pub use stub::Error;
pub use stub::GdbServer;
pub use stub::GdbServerBuilder;
pub use stub::KillBehaviour;
pub use stub::StopMode;
