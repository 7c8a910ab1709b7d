//! A small teaching machine: a word addressed CPU, paged virtual memory with
//! a swap disk, a preemptive round robin scheduler and a console.
//!
//! [`System::boot`] starts the whole thing with its device and CPU threads.
//! [`Kernel`] alone, with the [`DeviceQueues`] it hands back, can be driven
//! one step at a time.

#[macro_use]
extern crate log;

pub mod config;
pub mod drivers;
pub mod error;
pub mod hw;
pub mod kernel;
pub mod loader;
pub mod logging;
pub mod mm;
pub mod shell;
pub mod system;
pub mod task;
pub mod timer;
pub mod trap;

pub use config::KernelConfig;
pub use error::{AuditError, ConfigError, KernelError, Result};
pub use kernel::{DeviceQueues, Kernel, PageInfo, ProcessSnapshot, ProcessSummary, Step};
pub use system::{Settled, System};
pub use task::{BlockReason, Pid, TaskStatus};
pub use trap::Interrupt;
