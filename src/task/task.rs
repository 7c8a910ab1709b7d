use super::{Pid, TaskContext};
use crate::hw::Word;
use crate::loader::Program;
use crate::mm::{PageTable, VirtAddr};
use bitflags::*;
use core::fmt::{self, Display, Formatter};
use std::sync::Arc;

bitflags! {
    /// Why a task is off the ready queue. A task leaves BLOCKED only when
    /// none of these is left.
    pub struct BlockReason: u8 {
        const IO = 1 << 0;
        const PAGE_FAULT = 1 << 1;
    }
}

impl Display for BlockReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(BlockReason::IO) {
            names.push("io");
        }
        if self.contains(BlockReason::PAGE_FAULT) {
            names.push("page-fault");
        }
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TaskStatus {
    New,
    Ready,
    Running,
    Blocked,
    Terminated,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::New => "NEW",
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Terminated => "TERMINATED",
        };
        f.pad(name)
    }
}

pub struct TaskControlBlock {
    pub pid: Pid,
    pub name: String,
    pub task_status: TaskStatus,
    pub task_cx: TaskContext,
    pub page_table: PageTable,
    pub blocked_on: BlockReason,
    /// program image, the source of pages that were never evicted
    pub image: Arc<[Word]>,
    /// logical size in words
    pub size: usize,
    /// console input that arrived while its target page was absent
    pub pending_input: Option<(VirtAddr, i32)>,
}

impl TaskControlBlock {
    pub fn new(pid: Pid, program: &Program, page_size: usize) -> Self {
        let size = program.required_words();
        let pages = (size + page_size - 1) / page_size;
        Self {
            pid,
            name: program.name.to_string(),
            task_status: TaskStatus::New,
            task_cx: TaskContext::init(),
            page_table: PageTable::new(pages),
            blocked_on: BlockReason::empty(),
            image: program.image.clone(),
            size,
            pending_input: None,
        }
    }
}
