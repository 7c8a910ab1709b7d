//! Devices that work next to the CPU: the swap disk and the console.
//!
//! Each device has a request queue and its own thread. Completions never
//! touch kernel state directly, they come back as
//! [`Interrupt`](crate::trap::Interrupt)s.

pub mod console;
pub mod disk;

pub use console::{ConsoleOutput, ConsoleService, IoCompletion, IoKind, IoRequest};
pub use disk::{
    DiskCompletion, DiskOpKind, DiskOperation, DiskResult, DiskStats, LoadSource, SwapDisk,
};
