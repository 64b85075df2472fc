//! Types shared between the protocol layer and the packet handlers.

mod ptid;
mod signal;

pub use ptid::IdKind;
pub use ptid::Ptid;
pub use signal::TargetSignal;
