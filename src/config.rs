//! Machine constants and the runtime [`KernelConfig`].

use crate::error::ConfigError;
use core::time::Duration;

/// words of physical memory
pub const MEMORY_WORDS: usize = 1024;
/// words per page / frame
pub const PAGE_SIZE: usize = 8;
/// instructions a process may run before the timer fires
pub const TIME_SLICE: usize = 5;
/// pages the swap disk can hold
pub const SWAP_SLOTS: usize = 128;

pub const DISK_LATENCY_MS: u64 = 20;
pub const IO_LATENCY_MS: u64 = 10;
/// how long an idle service thread sleeps before re-checking its stop flag
pub const IDLE_POLL_MS: u64 = 5;

/// transitions kept in the in-memory state log
pub const HISTORY_LIMIT: usize = 4096;

pub const REGISTER_COUNT: usize = 10;
/// `r8` selects the system call, `r9` carries its address argument
pub const SYSCALL_REG: usize = 8;
pub const SYSCALL_ARG_REG: usize = 9;

pub const MAX_INT: i32 = 32767;
pub const MIN_INT: i32 = -32767;

/// Everything a [`Kernel`](crate::kernel::Kernel) needs to know about the
/// simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub memory_words: usize,
    pub page_size: usize,
    pub time_slice: usize,
    pub swap_slots: usize,
    pub disk_latency: Duration,
    pub io_latency: Duration,
    /// dispatch READY processes without waiting for `execall`
    pub auto_schedule: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            memory_words: MEMORY_WORDS,
            page_size: PAGE_SIZE,
            time_slice: TIME_SLICE,
            swap_slots: SWAP_SLOTS,
            disk_latency: Duration::from_millis(DISK_LATENCY_MS),
            io_latency: Duration::from_millis(IO_LATENCY_MS),
            auto_schedule: false,
        }
    }
}

impl KernelConfig {
    /// number of physical frames
    pub fn frame_count(&self) -> usize {
        self.memory_words / self.page_size
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.memory_words < self.page_size {
            return Err(ConfigError::MemoryTooSmall {
                memory: self.memory_words,
                page: self.page_size,
            });
        }
        if self.memory_words % self.page_size != 0 {
            return Err(ConfigError::UnalignedMemory {
                memory: self.memory_words,
                page: self.page_size,
            });
        }
        if self.time_slice == 0 {
            return Err(ConfigError::ZeroTimeSlice);
        }
        if self.swap_slots == 0 {
            return Err(ConfigError::ZeroSwapSlots);
        }
        Ok(())
    }
}
