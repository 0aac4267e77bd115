//! Architecture support
//!
//! Everything CPU- and platform-specific the memory-management core treats
//! as an external collaborator: descriptor tables, interrupt dispatch,
//! legacy drivers, and the boot entry point. A single target is supported.

pub mod x86;
