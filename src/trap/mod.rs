//! Interrupts and their dispatch.
//!
//! The CPU raises an [`Interrupt`] from inside an instruction, the devices
//! raise one when an operation completes. Either way it ends up in
//! [`KernelInner::trap_handler`], which runs inside the kernel lock and
//! handles each interrupt exactly once.

use crate::drivers::{DiskCompletion, DiskResult, IoCompletion};
use crate::error::KernelError;
use crate::hw::Word;
use crate::kernel::KernelInner;
use crate::mm::{TranslateError, VirtAddr, VirtPageNum};
use crate::task::{BlockReason, Cause, Pid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// the running task used up its time slice
    Timer,
    /// the running task touched a page that is not in memory yet
    PageFault { page: VirtPageNum },
    InvalidAddress,
    Overflow,
    InvalidInstruction,
    Stop,
    /// the running task issued console I/O and has to wait for it
    IoWait,
    /// no frame can be found for a fault, the kernel can not go on
    FramesExhausted,
    DiskDone(DiskCompletion),
    IoDone(IoCompletion),
}

impl From<TranslateError> for Interrupt {
    fn from(e: TranslateError) -> Self {
        match e {
            TranslateError::PageFault { page } => Interrupt::PageFault { page },
            TranslateError::InvalidAddress => Interrupt::InvalidAddress,
            TranslateError::FramesExhausted => Interrupt::FramesExhausted,
        }
    }
}

impl KernelInner {
    pub(crate) fn trap_handler(&mut self, irq: Interrupt) {
        match irq {
            Interrupt::Timer => {
                self.tasks.on_timer_expired(&mut self.cpu);
            }
            Interrupt::PageFault { page } => {
                if let Some(pid) = self.tasks.running() {
                    debug!("[kernel] pid {} blocked on page {}", pid, page);
                    self.tasks
                        .block_running(&mut self.cpu, BlockReason::PAGE_FAULT, Cause::PageFault);
                }
            }
            Interrupt::IoWait => {
                self.tasks
                    .block_running(&mut self.cpu, BlockReason::IO, Cause::IoRequested);
            }
            Interrupt::FramesExhausted => self.halt(KernelError::FramesExhausted),
            Interrupt::DiskDone(done) => self.disk_done(done),
            Interrupt::IoDone(done) => self.io_done(done),
            Interrupt::InvalidAddress => self.end_running(Cause::InvalidAddress),
            Interrupt::Overflow => self.end_running(Cause::Overflow),
            Interrupt::InvalidInstruction => self.end_running(Cause::InvalidInstruction),
            Interrupt::Stop => self.end_running(Cause::Stopped),
        }
    }

    fn end_running(&mut self, cause: Cause) {
        let pid = match self.tasks.running() {
            Some(pid) => pid,
            None => return,
        };
        if cause == Cause::Stopped {
            info!("[kernel] pid {} finished", pid);
        } else {
            let pc = self.cpu.context().pc;
            error!("[kernel] pid {}: {} at pc {}, killed", pid, cause, pc);
        }
        self.terminate(pid, cause);
    }

    fn disk_done(&mut self, done: DiskCompletion) {
        match done.result {
            DiskResult::Loaded(data) => {
                let woken = self
                    .mm
                    .complete_load(&mut self.tasks, done.pid, done.page, done.frame, &data);
                if let Some(pid) = woken {
                    self.tasks.unblock(pid, BlockReason::PAGE_FAULT, Cause::PageLoaded);
                }
            }
            DiskResult::Saved { slot } => {
                self.mm
                    .complete_save(&mut self.tasks, done.pid, done.page, slot);
            }
            DiskResult::DiskFull => {
                if self.tasks.contains(done.pid) {
                    error!(
                        "[kernel] pid {} page {} could not be saved, killed",
                        done.pid, done.page
                    );
                    self.terminate(done.pid, Cause::DiskFull);
                }
            }
        }
    }

    fn io_done(&mut self, done: IoCompletion) {
        match done {
            IoCompletion::Write { pid } => {
                self.tasks.unblock(pid, BlockReason::IO, Cause::IoCompleted);
            }
            IoCompletion::Read { pid, addr, value } => {
                if !self.tasks.contains(pid) {
                    return;
                }
                match self.mm.translate(&mut self.tasks, pid, addr, true) {
                    Ok(pa) => {
                        self.mm.write(pa, Word::data(value));
                        self.tasks.unblock(pid, BlockReason::IO, Cause::IoCompleted);
                    }
                    Err(TranslateError::PageFault { page }) => {
                        // the load is queued, it stores the value when it lands
                        debug!("[kernel] input for pid {} waits for page {}", pid, page);
                        self.defer_input(pid, addr, value);
                        self.tasks
                            .block(pid, BlockReason::PAGE_FAULT, Cause::PageFault);
                        self.tasks.unblock(pid, BlockReason::IO, Cause::IoCompleted);
                    }
                    Err(TranslateError::InvalidAddress) => {
                        self.terminate(pid, Cause::InvalidAddress);
                    }
                    Err(TranslateError::FramesExhausted) => {
                        self.halt(KernelError::FramesExhausted);
                    }
                }
            }
        }
    }

    fn defer_input(&mut self, pid: Pid, addr: i32, value: i32) {
        if let (Some(task), Some(va)) = (self.tasks.get_mut(pid), VirtAddr::from_logical(addr)) {
            task.pending_input = Some((va, value));
        }
    }

    /// End `pid`, give back its memory and hand the CPU to the next task.
    pub(crate) fn terminate(&mut self, pid: Pid, cause: Cause) {
        if let Some(task) = self.tasks.remove_process(pid, cause) {
            self.mm.release(&task);
        }
        self.tasks.dispatch_next(&mut self.cpu);
    }

    pub(crate) fn halt(&mut self, err: KernelError) {
        error!("[kernel] {}", err);
        self.halted = Some(err);
    }
}
