//! Record of every task state change.
//!
//! Each transition is kept in a bounded in-memory log and written out through
//! `log` under the `state` target, together with the page table of the task at
//! that moment.

use super::{Pid, TaskControlBlock, TaskStatus};
use crate::config::HISTORY_LIMIT;
use core::fmt::{self, Display, Formatter};
use std::collections::VecDeque;

/// What made a task change state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Cause {
    Created,
    Dispatched,
    TimeSliceExpired,
    PageFault,
    PageLoaded,
    IoRequested,
    IoCompleted,
    Stopped,
    InvalidAddress,
    Overflow,
    InvalidInstruction,
    DiskFull,
    Removed,
}

impl Display for Cause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cause::Created => "created",
            Cause::Dispatched => "dispatched",
            Cause::TimeSliceExpired => "time slice expired",
            Cause::PageFault => "page fault",
            Cause::PageLoaded => "page loaded",
            Cause::IoRequested => "io requested",
            Cause::IoCompleted => "io completed",
            Cause::Stopped => "stopped",
            Cause::InvalidAddress => "invalid address",
            Cause::Overflow => "overflow",
            Cause::InvalidInstruction => "invalid instruction",
            Cause::DiskFull => "disk full",
            Cause::Removed => "removed",
        };
        f.pad(name)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transition {
    /// position in the whole history, starting at 1
    pub seq: u64,
    pub pid: Pid,
    pub name: String,
    pub cause: Cause,
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// page table summary at the time of the change
    pub pages: String,
}

/// `seq ; pid ; name ; cause ; from ; to ; {pages}`
impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ; {} ; {} ; {} ; {} ; {} ; {}",
            self.seq, self.pid, self.name, self.cause, self.from, self.to, self.pages
        )
    }
}

#[derive(Default)]
pub struct TransitionLog {
    seq: u64,
    entries: VecDeque<Transition>,
}

impl TransitionLog {
    pub fn record(&mut self, task: &TaskControlBlock, cause: Cause, from: TaskStatus) {
        self.seq += 1;
        let transition = Transition {
            seq: self.seq,
            pid: task.pid,
            name: task.name.clone(),
            cause,
            from,
            to: task.task_status,
            pages: task.page_table.to_string(),
        };
        info!(target: "state", "{}", transition);
        if self.entries.len() == HISTORY_LIMIT {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub fn entries(&self) -> Vec<Transition> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
