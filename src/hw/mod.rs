//! The simulated machine: memory cells, physical memory and the CPU.

mod cpu;
mod memory;
mod word;

pub use cpu::{Bus, Cpu, SYSCALL_IN, SYSCALL_OUT};
pub use memory::{MemoryDump, PhysicalMemory};
pub use word::{Opcode, Word};
