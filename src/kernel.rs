//! The kernel object: all shared state behind one lock.
//!
//! [`KernelInner`] holds the process table, page tables, frame table,
//! physical memory, scheduler queues and the CPU. Every public operation of
//! [`Kernel`] takes the lock once and runs as a single transaction, be it one
//! instruction, one fault or one device completion. The `has_work` condition
//! variable wakes the scheduler thread whenever something may have become
//! dispatchable.

use crate::config::KernelConfig;
use crate::drivers::{DiskOperation, DiskStats, IoKind, IoRequest, SwapDisk};
use crate::error::{AuditError, KernelError, Result};
use crate::hw::{Bus, Cpu, MemoryDump, Word};
use crate::loader;
use crate::mm::{FrameInfo, MemoryManager, PhysPageNum, TranslateError, VirtPageNum};
use crate::task::{
    BlockReason, Cause, Pid, TaskContext, TaskControlBlock, TaskManager, TaskStatus, Transition,
};
use crate::trap::Interrupt;
use core::fmt::{self, Display, Formatter};
use core::time::Duration;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

pub struct KernelInner {
    pub(crate) config: KernelConfig,
    pub(crate) mm: MemoryManager,
    pub(crate) tasks: TaskManager,
    pub(crate) cpu: Cpu,
    pub(crate) console: Sender<IoRequest>,
    pub(crate) next_pid: Pid,
    pub(crate) halted: Option<KernelError>,
}

/// The receiving ends of the device queues, to be handed to the device
/// threads (or drained by hand in tests).
pub struct DeviceQueues {
    pub disk: Receiver<DiskOperation>,
    pub console: Receiver<IoRequest>,
}

/// Outcome of [`Kernel::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// one instruction ran (it may have raised an interrupt)
    Executed,
    /// nothing is running and nothing could be dispatched
    Idle,
    Halted,
}

pub struct Kernel {
    inner: Mutex<KernelInner>,
    has_work: Condvar,
    swap: Arc<SwapDisk>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Result<(Self, DeviceQueues)> {
        config.validate()?;
        let (disk_tx, disk_rx) = channel();
        let (console_tx, console_rx) = channel();
        let swap = Arc::new(SwapDisk::new(config.swap_slots, config.page_size));
        let inner = KernelInner {
            mm: MemoryManager::new(&config, swap.clone(), disk_tx),
            tasks: TaskManager::new(config.auto_schedule),
            cpu: Cpu::new(config.time_slice),
            console: console_tx,
            next_pid: 1,
            halted: None,
            config,
        };
        info!(
            "[kernel] {} words of memory, {} frames of {} words, time slice {}",
            inner.config.memory_words,
            inner.config.frame_count(),
            inner.config.page_size,
            inner.config.time_slice
        );
        let kernel = Self {
            inner: Mutex::new(inner),
            has_work: Condvar::new(),
            swap,
        };
        let queues = DeviceQueues {
            disk: disk_rx,
            console: console_rx,
        };
        Ok((kernel, queues))
    }

    fn lock(&self) -> MutexGuard<'_, KernelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// wake the scheduler thread
    pub fn notify(&self) {
        self.has_work.notify_all();
    }

    pub fn swap(&self) -> Arc<SwapDisk> {
        self.swap.clone()
    }

    pub fn config(&self) -> KernelConfig {
        self.lock().config.clone()
    }

    /// Create a process running the built-in program `name`. Only its first
    /// page is brought in, the rest is loaded on demand.
    pub fn create_process(&self, name: &str) -> Result<Pid> {
        let program =
            loader::get_program(name).ok_or_else(|| KernelError::NoSuchProgram(name.into()))?;
        let mut inner = self.lock();
        if inner.halted.is_some() {
            return Err(KernelError::Halted);
        }
        let pid = inner.next_pid;
        inner.next_pid += 1;
        let mut task = TaskControlBlock::new(pid, &program, inner.config.page_size);
        if !inner.mm.load_initial(&mut task) {
            warn!("[kernel] no free frame for pid {}, page 0 loads on demand", pid);
        }
        info!(
            "[kernel] created pid {} ({}, {} words, {} pages)",
            pid,
            name,
            task.size,
            task.page_table.len()
        );
        inner.tasks.insert(task);
        inner.tasks.add_to_ready(pid, Cause::Created);
        drop(inner);
        self.notify();
        Ok(pid)
    }

    /// Terminate `pid` no matter what state it is in.
    pub fn remove_process(&self, pid: Pid) -> Result<()> {
        let mut inner = self.lock();
        if !inner.tasks.contains(pid) {
            return Err(KernelError::NoSuchProcess(pid));
        }
        inner.terminate(pid, Cause::Removed);
        drop(inner);
        self.notify();
        Ok(())
    }

    /// Hand `pid` to the scheduler even while auto scheduling is off. Only a
    /// NEW or READY process can be started this way.
    pub fn exec_process(&self, pid: Pid) -> Result<()> {
        let mut inner = self.lock();
        let status = inner
            .tasks
            .get(pid)
            .map(|task| task.task_status)
            .ok_or(KernelError::NoSuchProcess(pid))?;
        match status {
            TaskStatus::Running => return Err(KernelError::AlreadyRunning(pid)),
            TaskStatus::Blocked => return Err(KernelError::ProcessBlocked(pid)),
            TaskStatus::Terminated => return Err(KernelError::NoSuchProcess(pid)),
            TaskStatus::New | TaskStatus::Ready => inner.tasks.release(pid),
        }
        info!("[kernel] pid {} released for execution", pid);
        drop(inner);
        self.notify();
        Ok(())
    }

    pub fn set_auto_schedule(&self, on: bool) {
        self.lock().tasks.set_auto_schedule(on);
        self.notify();
    }

    pub fn auto_schedule(&self) -> bool {
        self.lock().tasks.auto_schedule()
    }

    /// Run one instruction of the running task, dispatching one first if the
    /// CPU is idle. Any interrupt the instruction raises is handled before
    /// the lock is released.
    pub fn step(&self) -> Step {
        let step = self.lock().step();
        if step == Step::Executed {
            self.notify();
        }
        step
    }

    /// Handle an interrupt raised outside the CPU, normally a device
    /// completion.
    pub fn handle_interrupt(&self, irq: Interrupt) {
        self.lock().trap_handler(irq);
        self.notify();
    }

    pub fn dispatch_next(&self) -> Option<Pid> {
        let mut inner = self.lock();
        if inner.halted.is_some() {
            return None;
        }
        let inner = &mut *inner;
        inner.tasks.dispatch_next(&mut inner.cpu)
    }

    /// Wait up to `timeout` for a task to become dispatchable. Returns whether
    /// one is.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .has_work
            .wait_timeout_while(guard, timeout, |inner| !inner.can_dispatch())
            .unwrap_or_else(PoisonError::into_inner);
        guard.can_dispatch()
    }

    pub fn halted(&self) -> Option<KernelError> {
        self.lock().halted.clone()
    }

    pub fn running(&self) -> Option<Pid> {
        self.lock().tasks.running()
    }

    pub fn ready_queue(&self) -> Vec<Pid> {
        self.lock().tasks.ready()
    }

    pub fn blocked(&self) -> Vec<Pid> {
        self.lock().tasks.blocked()
    }

    pub fn live_processes(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn snapshot(&self, pid: Pid) -> Result<ProcessSnapshot> {
        let inner = self.lock();
        let task = inner.tasks.get(pid).ok_or(KernelError::NoSuchProcess(pid))?;
        let cx = if inner.tasks.running() == Some(pid) {
            inner.cpu.context()
        } else {
            task.task_cx
        };
        Ok(ProcessSnapshot::new(task, cx))
    }

    pub fn processes(&self) -> Vec<ProcessSummary> {
        self.lock()
            .tasks
            .iter()
            .map(|task| ProcessSummary {
                pid: task.pid,
                name: task.name.clone(),
                status: task.task_status,
                blocked_on: task.blocked_on,
                pages: task.page_table.len(),
                present: task.page_table.present_pages(),
            })
            .collect()
    }

    pub fn frames(&self) -> Vec<FrameInfo> {
        self.lock().mm.frames()
    }

    pub fn free_frames(&self) -> usize {
        self.lock().mm.free_frames()
    }

    pub fn dump_memory(&self, start: usize, end: usize) -> MemoryDump {
        self.lock().mm.dump(start, end)
    }

    /// Read a word of `pid` without faulting. `None` when the page is absent.
    pub fn peek(&self, pid: Pid, addr: usize) -> Option<Word> {
        let inner = self.lock();
        let page_size = inner.config.page_size;
        let task = inner.tasks.get(pid)?;
        let frame = task
            .page_table
            .get(VirtPageNum(addr / page_size))?
            .frame()?;
        Some(inner.mm.read(frame.addr(page_size, addr % page_size)))
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.lock().tasks.transitions()
    }

    pub fn disk_stats(&self) -> DiskStats {
        self.swap.stats()
    }

    /// Check the frame table, page tables and queues against each other.
    pub fn audit(&self) -> core::result::Result<(), AuditError> {
        let inner = self.lock();
        inner.mm.audit(&inner.tasks)?;
        inner.tasks.audit()
    }
}

impl KernelInner {
    fn can_dispatch(&self) -> bool {
        self.halted.is_none() && self.tasks.can_dispatch()
    }

    fn step(&mut self) -> Step {
        if self.halted.is_some() {
            return Step::Halted;
        }
        if self.tasks.running().is_none() {
            self.tasks.dispatch_next(&mut self.cpu);
        }
        let pid = match self.tasks.running() {
            Some(pid) => pid,
            None => return Step::Idle,
        };
        let limit = self.tasks.get(pid).map_or(0, |task| task.size);
        let mut bus = ProcessBus {
            mm: &mut self.mm,
            tasks: &mut self.tasks,
            console: &self.console,
            pid,
            limit,
        };
        if let Some(irq) = self.cpu.step(&mut bus) {
            self.trap_handler(irq);
        }
        Step::Executed
    }
}

/// The running process's view of memory and devices.
struct ProcessBus<'a> {
    mm: &'a mut MemoryManager,
    tasks: &'a mut TaskManager,
    console: &'a Sender<IoRequest>,
    pid: Pid,
    limit: usize,
}

impl Bus for ProcessBus<'_> {
    fn read(&mut self, va: i32) -> core::result::Result<Word, TranslateError> {
        let pa = self.mm.translate(self.tasks, self.pid, va, false)?;
        Ok(self.mm.read(pa))
    }

    fn write(&mut self, va: i32, word: Word) -> core::result::Result<(), TranslateError> {
        let pa = self.mm.translate(self.tasks, self.pid, va, true)?;
        self.mm.write(pa, word);
        Ok(())
    }

    fn probe_write(&mut self, va: i32) -> core::result::Result<(), TranslateError> {
        self.mm.translate(self.tasks, self.pid, va, true).map(|_| ())
    }

    fn request_io(&mut self, kind: IoKind) {
        let request = IoRequest {
            pid: self.pid,
            kind,
        };
        if self.console.send(request).is_err() {
            warn!("[kernel] console service is gone, request of pid {} dropped", self.pid);
        }
    }

    fn limit(&self) -> usize {
        self.limit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub pid: Pid,
    pub name: String,
    pub status: TaskStatus,
    pub blocked_on: BlockReason,
    pub pages: usize,
    pub present: usize,
}

impl Display for ProcessSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}  {:<14} {:<10} {}/{} pages",
            self.pid, self.name, self.status, self.present, self.pages
        )?;
        if !self.blocked_on.is_empty() {
            write!(f, "  waiting on {}", self.blocked_on)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: VirtPageNum,
    pub present: bool,
    pub frame: Option<PhysPageNum>,
    pub disk_slot: Option<usize>,
    pub modified: bool,
    pub loading: bool,
    /// logical time of the last access
    pub last_access: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub name: String,
    pub status: TaskStatus,
    pub pc: usize,
    pub regs: [i32; crate::config::REGISTER_COUNT],
    pub blocked_on: BlockReason,
    pub size: usize,
    pub pages: Vec<PageInfo>,
}

impl ProcessSnapshot {
    fn new(task: &TaskControlBlock, cx: TaskContext) -> Self {
        Self {
            pid: task.pid,
            name: task.name.clone(),
            status: task.task_status,
            pc: cx.pc,
            regs: cx.regs,
            blocked_on: task.blocked_on,
            size: task.size,
            pages: task
                .page_table
                .iter()
                .map(|(page, pte)| PageInfo {
                    page,
                    present: pte.is_present(),
                    frame: pte.frame(),
                    disk_slot: pte.disk_slot(),
                    modified: pte.is_modified(),
                    loading: pte.is_loading(),
                    last_access: pte.last_access(),
                })
                .collect(),
        }
    }

    pub fn page(&self, page: usize) -> Option<&PageInfo> {
        self.pages.get(page)
    }

    pub fn present_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.present).count()
    }
}

impl Display for ProcessSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pid {} ({}) {} pc {} size {} words, waiting on {}",
            self.pid, self.name, self.status, self.pc, self.size, self.blocked_on
        )?;
        write!(f, "  regs")?;
        for (i, r) in self.regs.iter().enumerate() {
            write!(f, " r{}={}", i, r)?;
        }
        writeln!(f)?;
        for page in &self.pages {
            let frame = page
                .frame
                .map_or_else(|| "-".to_string(), |frame| frame.to_string());
            let slot = page
                .disk_slot
                .map_or_else(|| "-".to_string(), |slot| slot.to_string());
            writeln!(
                f,
                "  page {:>3}: frame {:>3} slot {:>3} used {:>5}{}{}",
                page.page,
                frame,
                slot,
                page.last_access,
                if page.modified { " modified" } else { "" },
                if page.loading { " loading" } else { "" }
            )?;
        }
        Ok(())
    }
}
