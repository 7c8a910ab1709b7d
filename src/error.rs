//! Errors returned by the kernel's public API.

use crate::mm::{PhysPageNum, VirtPageNum};
use crate::task::{Pid, TaskStatus};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, KernelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("page size must be greater than 0")]
    ZeroPageSize,

    #[error("memory of {memory} words can not hold a single page of {page} words")]
    MemoryTooSmall { memory: usize, page: usize },

    #[error("memory of {memory} words is not a multiple of the page size {page}")]
    UnalignedMemory { memory: usize, page: usize },

    #[error("time slice must be at least one instruction")]
    ZeroTimeSlice,

    #[error("swap disk needs at least one slot")]
    ZeroSwapSlots,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("no program named {0:?}")]
    NoSuchProgram(String),

    #[error("process with pid: {0} not found")]
    NoSuchProcess(Pid),

    #[error("process {0} is already running")]
    AlreadyRunning(Pid),

    #[error("process {0} is blocked waiting for the disk or the console")]
    ProcessBlocked(Pid),

    /// every frame is reserved for an in-flight load, nothing can be evicted
    #[error("all physical frames are locked, kernel halted")]
    FramesExhausted,

    #[error("kernel is halted")]
    Halted,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start the {0} thread")]
    Spawn(&'static str),
}

/// A broken kernel invariant found by [`Kernel::audit`](crate::kernel::Kernel::audit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("frame {frame} is claimed by pid {first} and pid {second}")]
    FrameClaimedTwice {
        frame: PhysPageNum,
        first: Pid,
        second: Pid,
    },

    #[error("pid {pid} page {page} is present in frame {frame}, which the frame table does not agree with")]
    OwnerMismatch {
        pid: Pid,
        page: VirtPageNum,
        frame: PhysPageNum,
    },

    #[error("pid {0} is in more than one of ready, blocked and running")]
    QueueOverlap(Pid),

    #[error("pid {pid} is {status} but not in the matching queue")]
    StatusMismatch { pid: Pid, status: TaskStatus },
}
