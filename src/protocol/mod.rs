//! RSP wire-format plumbing: the hex/escape codec, the reusable packet
//! buffer, and the `$…#cc` framer.

pub mod framer;
pub mod hex;
pub mod packet;
