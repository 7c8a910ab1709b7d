#![allow(dead_code)]

use core::time::Duration;
use std::collections::BTreeMap;
use vmos::drivers::{DiskOperation, IoCompletion, IoKind, IoRequest};
use vmos::hw::Opcode;
use vmos::{DeviceQueues, Interrupt, Kernel, KernelConfig, Pid, Step, TaskStatus};

pub fn config(memory_words: usize, page_size: usize) -> KernelConfig {
    KernelConfig {
        memory_words,
        page_size,
        disk_latency: Duration::from_millis(1),
        io_latency: Duration::from_millis(1),
        auto_schedule: true,
        ..KernelConfig::default()
    }
}

/// A kernel whose devices are served by hand, one queue drain at a time.
pub struct Machine {
    pub kernel: Kernel,
    queues: DeviceQueues,
    /// every disk operation served so far, in queue order
    pub disk_log: Vec<DiskOperation>,
    pub output: Vec<(Pid, i32)>,
    reads: BTreeMap<Pid, i32>,
}

impl Machine {
    pub fn new(config: KernelConfig) -> Self {
        let (kernel, queues) = Kernel::new(config).unwrap();
        Self {
            kernel,
            queues,
            disk_log: Vec::new(),
            output: Vec::new(),
            reads: BTreeMap::new(),
        }
    }

    pub fn spawn(&self, program: &str) -> Pid {
        self.kernel.create_process(program).unwrap()
    }

    /// Disk operations queued but not served yet.
    pub fn pending_disk(&mut self) -> Vec<DiskOperation> {
        self.queues.disk.try_iter().collect()
    }

    pub fn serve_disk(&mut self, ops: Vec<DiskOperation>) {
        let mut loads: Vec<_> = ops
            .iter()
            .filter(|op| op.is_load())
            .map(|op| (op.pid, op.page))
            .collect();
        let queued = loads.len();
        loads.sort();
        loads.dedup();
        assert_eq!(loads.len(), queued, "a page was queued for loading twice");

        let swap = self.kernel.swap();
        for op in ops {
            self.disk_log.push(op.clone());
            let done = swap.perform(op);
            self.kernel.handle_interrupt(Interrupt::DiskDone(done));
            self.kernel.audit().unwrap();
        }
    }

    /// Serve everything both devices have queued. Returns how many requests
    /// were handled.
    pub fn pump(&mut self) -> usize {
        let ops = self.pending_disk();
        let mut handled = ops.len();
        self.serve_disk(ops);
        let requests: Vec<IoRequest> = self.queues.console.try_iter().collect();
        handled += requests.len();
        for request in requests {
            match request.kind {
                IoKind::Write { value } => {
                    self.output.push((request.pid, value));
                    let done = IoCompletion::Write { pid: request.pid };
                    self.kernel.handle_interrupt(Interrupt::IoDone(done));
                }
                IoKind::Read { addr } => {
                    self.reads.insert(request.pid, addr);
                }
            }
        }
        handled
    }

    pub fn waiting_for_input(&self) -> Vec<Pid> {
        self.reads.keys().copied().collect()
    }

    /// Answer the pending console read of `pid`.
    pub fn provide(&mut self, pid: Pid, value: i32) {
        let addr = self.reads.remove(&pid).expect("no read pending");
        let done = IoCompletion::Read { pid, addr, value };
        self.kernel.handle_interrupt(Interrupt::IoDone(done));
    }

    /// One step, serving the devices whenever the CPU runs dry. Returns
    /// false once nothing can move anymore.
    pub fn advance(&mut self) -> bool {
        match self.kernel.step() {
            Step::Executed => true,
            Step::Idle => {
                if self.pump() == 0 {
                    return false;
                }
                self.kernel.dispatch_next();
                true
            }
            Step::Halted => false,
        }
    }

    /// Run until every process is gone or all that remain wait for input.
    pub fn run(&mut self, max_steps: usize) {
        for _ in 0..max_steps {
            if !self.advance() {
                return;
            }
            self.kernel.audit().unwrap();
        }
        panic!("still running after {} steps", max_steps);
    }

    fn at_stop(&self, pid: Pid) -> bool {
        let snapshot = match self.kernel.snapshot(pid) {
            Ok(snapshot) if snapshot.status == TaskStatus::Running => snapshot,
            _ => return false,
        };
        self.kernel
            .peek(pid, snapshot.pc)
            .map_or(false, |word| word.opc == Opcode::Stop)
    }

    /// Run until `pid` is on the CPU about to execute STOP, so its memory
    /// can still be inspected.
    pub fn run_until_stop(&mut self, pid: Pid, max_steps: usize) {
        for _ in 0..max_steps {
            if self.at_stop(pid) {
                return;
            }
            assert!(self.advance(), "pid {} never reached STOP", pid);
            self.kernel.audit().unwrap();
        }
        panic!("pid {} still running after {} steps", pid, max_steps);
    }

    /// Run until the disk queue holds something.
    pub fn run_until_disk_op(&mut self, max_steps: usize) -> Vec<DiskOperation> {
        for _ in 0..max_steps {
            let ops = self.pending_disk();
            if !ops.is_empty() {
                return ops;
            }
            assert_eq!(self.kernel.step(), Step::Executed);
        }
        panic!("no disk operation after {} steps", max_steps);
    }

    pub fn read(&self, pid: Pid, addr: usize) -> i32 {
        self.kernel
            .peek(pid, addr)
            .unwrap_or_else(|| panic!("address {} of pid {} is not resident", addr, pid))
            .p
    }
}
