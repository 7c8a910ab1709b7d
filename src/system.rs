//! Boot and shutdown of the whole machine.
//!
//! [`System::boot`] builds a [`Kernel`] and starts four threads around it:
//!
//! - cpu: feeds device interrupts to the kernel, then runs one instruction
//! - scheduler: sleeps on the kernel's condition variable and dispatches
//! - disk / console: the device services
//!
//! Every thread watches the same stop flag. Shutdown raises it, wakes the
//! scheduler and joins them all; queued disk operations are dropped.

use crate::config::{KernelConfig, IDLE_POLL_MS};
use crate::drivers::{console, disk, ConsoleService};
use crate::error::{KernelError, Result};
use crate::kernel::{Kernel, Step};
use crate::task::{BlockReason, Pid, TaskStatus};
use crate::trap::Interrupt;
use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Where the running processes stand once nothing moves anymore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// every process has terminated
    Finished,
    /// the rest are waiting for console input
    AwaitingInput(Vec<Pid>),
    Halted(KernelError),
    /// the deadline passed first
    TimedOut,
}

pub struct System {
    kernel: Arc<Kernel>,
    console: Arc<ConsoleService>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl System {
    pub fn boot(config: KernelConfig) -> Result<Self> {
        let disk_latency = config.disk_latency;
        let io_latency = config.io_latency;
        let (kernel, queues) = Kernel::new(config)?;
        let kernel = Arc::new(kernel);
        let (irq_tx, irq_rx) = channel();
        let console_service = Arc::new(ConsoleService::new(irq_tx.clone()));
        let stop = Arc::new(AtomicBool::new(false));

        let mut system = Self {
            kernel: kernel.clone(),
            console: console_service.clone(),
            stop: stop.clone(),
            threads: Vec::with_capacity(4),
        };
        let disk_thread =
            disk::spawn(kernel.swap(), queues.disk, irq_tx, disk_latency, stop.clone())
                .map_err(|_| KernelError::Spawn("disk"))?;
        system.threads.push(disk_thread);
        let console_thread =
            console::spawn(console_service, queues.console, io_latency, stop.clone())
                .map_err(|_| KernelError::Spawn("console"))?;
        system.threads.push(console_thread);
        let cpu = spawn_cpu(kernel.clone(), irq_rx, stop.clone())
            .map_err(|_| KernelError::Spawn("cpu"))?;
        system.threads.push(cpu);
        let scheduler =
            spawn_scheduler(kernel, stop).map_err(|_| KernelError::Spawn("scheduler"))?;
        system.threads.push(scheduler);
        info!("[kernel] system booted");
        Ok(system)
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn console(&self) -> &Arc<ConsoleService> {
        &self.console
    }

    /// Remove a process and any console read it left behind.
    pub fn remove_process(&self, pid: Pid) -> Result<()> {
        self.kernel.remove_process(pid)?;
        self.console.cancel(pid);
        Ok(())
    }

    /// Poll until every process is gone, the rest only wait for input, or
    /// `timeout` passes.
    pub fn wait_until_settled(&self, timeout: Duration) -> Settled {
        self.settle(timeout, None)
    }

    /// Like [`wait_until_settled`](Self::wait_until_settled), looking at
    /// `pid` alone.
    pub fn wait_for_process(&self, pid: Pid, timeout: Duration) -> Settled {
        self.settle(timeout, Some(pid))
    }

    fn settle(&self, timeout: Duration, only: Option<Pid>) -> Settled {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(err) = self.kernel.halted() {
                return Settled::Halted(err);
            }
            let processes: Vec<_> = self
                .kernel
                .processes()
                .into_iter()
                .filter(|p| only.map_or(true, |pid| p.pid == pid))
                .collect();
            if processes.is_empty() {
                return Settled::Finished;
            }
            let waiting = self.console.waiting();
            let all_waiting = processes.iter().all(|p| {
                p.status == TaskStatus::Blocked
                    && p.blocked_on == BlockReason::IO
                    && waiting.contains(&p.pid)
            });
            if all_waiting {
                return Settled::AwaitingInput(processes.iter().map(|p| p.pid).collect());
            }
            if Instant::now() >= deadline {
                return Settled::TimedOut;
            }
            thread::sleep(Duration::from_millis(IDLE_POLL_MS));
        }
    }

    pub fn shutdown(self) {
        drop(self);
    }

    fn stop_threads(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.kernel.notify();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("[kernel] a service thread panicked");
            }
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.stop_threads();
        info!("[kernel] system stopped");
    }
}

fn spawn_cpu(
    kernel: Arc<Kernel>,
    irq: Receiver<Interrupt>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("cpu".into()).spawn(move || {
        let idle = Duration::from_millis(IDLE_POLL_MS);
        while !stop.load(Ordering::Acquire) {
            // device signals first, so a completed load is seen before the next instruction
            while let Ok(signal) = irq.try_recv() {
                kernel.handle_interrupt(signal);
            }
            match kernel.step() {
                Step::Executed => {}
                Step::Idle | Step::Halted => match irq.recv_timeout(idle) {
                    Ok(signal) => kernel.handle_interrupt(signal),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            }
        }
    })
}

fn spawn_scheduler(kernel: Arc<Kernel>, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("scheduler".into()).spawn(move || {
        let idle = Duration::from_millis(IDLE_POLL_MS);
        while !stop.load(Ordering::Acquire) {
            if kernel.wait_for_work(idle) {
                if let Some(pid) = kernel.dispatch_next() {
                    trace!("[kernel] scheduler dispatched pid {}", pid);
                }
            }
        }
    })
}
