//! Task management implementation
//!
//! Everything about scheduling, like dispatching, preempting, blocking and
//! unblocking tasks, is implemented here.
//!
//! A [`TaskManager`] owns every [`TaskControlBlock`] together with the ready
//! queue, the blocked set and the single running slot. A pid is in at most
//! one of those three at any time. The manager lives inside the kernel lock,
//! so each operation below is one atomic transition.

mod context;
mod history;

#[allow(clippy::module_inception)]
mod task;

use crate::error::AuditError;
use crate::hw::Cpu;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use context::TaskContext;
pub use history::{Cause, Transition, TransitionLog};
pub use task::{BlockReason, TaskControlBlock, TaskStatus};

pub type Pid = usize;

pub struct TaskManager {
    tasks: BTreeMap<Pid, TaskControlBlock>,
    ready: VecDeque<Pid>,
    blocked: BTreeSet<Pid>,
    running: Option<Pid>,
    /// READY tasks are only dispatched while this is set
    auto_schedule: bool,
    /// tasks picked by hand with `exec`, dispatchable even with
    /// `auto_schedule` off
    released: BTreeSet<Pid>,
    history: TransitionLog,
}

impl TaskManager {
    pub fn new(auto_schedule: bool) -> Self {
        Self {
            tasks: BTreeMap::new(),
            ready: VecDeque::new(),
            blocked: BTreeSet::new(),
            running: None,
            auto_schedule,
            released: BTreeSet::new(),
            history: TransitionLog::default(),
        }
    }

    /// Take ownership of a NEW task. It is not queued until
    /// [`add_to_ready`](Self::add_to_ready).
    pub fn insert(&mut self, task: TaskControlBlock) {
        self.tasks.insert(task.pid, task);
    }

    pub fn get(&self, pid: Pid) -> Option<&TaskControlBlock> {
        self.tasks.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut TaskControlBlock> {
        self.tasks.get_mut(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.tasks.contains_key(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    pub fn ready(&self) -> Vec<Pid> {
        self.ready.iter().copied().collect()
    }

    pub fn blocked(&self) -> Vec<Pid> {
        self.blocked.iter().copied().collect()
    }

    pub fn auto_schedule(&self) -> bool {
        self.auto_schedule
    }

    pub fn set_auto_schedule(&mut self, on: bool) {
        self.auto_schedule = on;
    }

    /// Let `pid` run while auto scheduling is off. A NEW task is queued.
    pub fn release(&mut self, pid: Pid) {
        let status = match self.tasks.get(&pid) {
            Some(task) => task.task_status,
            None => return,
        };
        self.released.insert(pid);
        if status == TaskStatus::New {
            self.add_to_ready(pid, Cause::Created);
        }
    }

    /// index in the ready queue of the task the next dispatch takes
    fn next_ready(&self) -> Option<usize> {
        if self.auto_schedule {
            return if self.ready.is_empty() { None } else { Some(0) };
        }
        self.ready
            .iter()
            .position(|pid| self.released.contains(pid))
    }

    /// true when [`dispatch_next`](Self::dispatch_next) would put a task on the CPU
    pub fn can_dispatch(&self) -> bool {
        self.running.is_none() && self.next_ready().is_some()
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.history.entries()
    }

    /// change the status of `pid` and log it
    fn transition(&mut self, pid: Pid, cause: Cause, to: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(&pid) {
            let from = task.task_status;
            task.task_status = to;
            self.history.record(task, cause, from);
        }
    }

    pub fn add_to_ready(&mut self, pid: Pid, cause: Cause) {
        if !self.contains(pid) {
            return;
        }
        self.blocked.remove(&pid);
        self.transition(pid, cause, TaskStatus::Ready);
        if !self.ready.contains(&pid) {
            self.ready.push_back(pid);
        }
    }

    /// Put the first READY task on the CPU. Does nothing while a task is
    /// running or the queue is empty. With auto scheduling off only
    /// released tasks are taken.
    pub fn dispatch_next(&mut self, cpu: &mut Cpu) -> Option<Pid> {
        if self.running.is_some() {
            return None;
        }
        let index = self.next_ready()?;
        let pid = self.ready.remove(index)?;
        self.transition(pid, Cause::Dispatched, TaskStatus::Running);
        let cx = self.tasks.get(&pid)?.task_cx;
        cpu.load(cx);
        self.running = Some(pid);
        Some(pid)
    }

    /// The running task used up its slice: back to the end of the queue.
    pub fn on_timer_expired(&mut self, cpu: &mut Cpu) {
        if let Some(pid) = self.take_running(cpu) {
            self.transition(pid, Cause::TimeSliceExpired, TaskStatus::Ready);
            self.ready.push_back(pid);
        }
        self.dispatch_next(cpu);
    }

    /// Block the running task for `reason` and dispatch the next one.
    pub fn block_running(&mut self, cpu: &mut Cpu, reason: BlockReason, cause: Cause) {
        if let Some(pid) = self.take_running(cpu) {
            if let Some(task) = self.tasks.get_mut(&pid) {
                task.blocked_on.insert(reason);
            }
            self.transition(pid, cause, TaskStatus::Blocked);
            self.blocked.insert(pid);
        }
        self.dispatch_next(cpu);
    }

    /// Add `reason` to a task that is not on the CPU. A READY task leaves the
    /// queue, a BLOCKED one just waits for one more thing.
    pub fn block(&mut self, pid: Pid, reason: BlockReason, cause: Cause) {
        if self.running == Some(pid) {
            return;
        }
        let status = match self.tasks.get_mut(&pid) {
            Some(task) => {
                task.blocked_on.insert(reason);
                task.task_status
            }
            None => return,
        };
        if status == TaskStatus::Ready {
            self.ready.retain(|&p| p != pid);
            self.transition(pid, cause, TaskStatus::Blocked);
            self.blocked.insert(pid);
        }
    }

    /// Clear `reason`. Returns true if that was the last one and the task is
    /// READY again.
    pub fn unblock(&mut self, pid: Pid, reason: BlockReason, cause: Cause) -> bool {
        let task = match self.tasks.get_mut(&pid) {
            Some(task) => task,
            None => return false,
        };
        task.blocked_on.remove(reason);
        if !task.blocked_on.is_empty() || task.task_status != TaskStatus::Blocked {
            return false;
        }
        self.add_to_ready(pid, cause);
        true
    }

    /// Terminate `pid` and drop every reference to it. The control block is
    /// handed back so its memory can be released.
    pub fn remove_process(&mut self, pid: Pid, cause: Cause) -> Option<TaskControlBlock> {
        if !self.contains(pid) {
            return None;
        }
        self.transition(pid, cause, TaskStatus::Terminated);
        self.ready.retain(|&p| p != pid);
        self.blocked.remove(&pid);
        self.released.remove(&pid);
        if self.running == Some(pid) {
            self.running = None;
        }
        self.tasks.remove(&pid)
    }

    /// save the CPU context into the running task and clear the running slot
    fn take_running(&mut self, cpu: &Cpu) -> Option<Pid> {
        let pid = self.running.take()?;
        if let Some(task) = self.tasks.get_mut(&pid) {
            task.task_cx = cpu.context();
        }
        Some(pid)
    }

    /// Check that queues and statuses agree.
    pub fn audit(&self) -> Result<(), AuditError> {
        let mut seen = BTreeSet::new();
        let queued = self
            .ready
            .iter()
            .chain(self.blocked.iter())
            .chain(self.running.iter());
        for &pid in queued {
            if !seen.insert(pid) {
                return Err(AuditError::QueueOverlap(pid));
            }
        }
        for task in self.tasks.values() {
            let expected = match task.task_status {
                TaskStatus::Ready => self.ready.contains(&task.pid),
                TaskStatus::Blocked => self.blocked.contains(&task.pid),
                TaskStatus::Running => self.running == Some(task.pid),
                TaskStatus::New | TaskStatus::Terminated => !seen.contains(&task.pid),
            };
            if !expected {
                return Err(AuditError::StatusMismatch {
                    pid: task.pid,
                    status: task.task_status,
                });
            }
        }
        Ok(())
    }
}
