//! Console device behind the IN / OUT system calls.
//!
//! A READ does not finish by itself: it parks until somebody provides a value
//! with [`ConsoleService::provide_input`]. A WRITE finishes once its latency
//! has passed.

use crate::config::IDLE_POLL_MS;
use crate::task::Pid;
use crate::trap::Interrupt;
use core::time::Duration;
use spin::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// read a value into logical address `addr`
    Read { addr: i32 },
    Write { value: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub pid: Pid,
    pub kind: IoKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCompletion {
    Read { pid: Pid, addr: i32, value: i32 },
    Write { pid: Pid },
}

impl IoCompletion {
    pub fn pid(&self) -> Pid {
        match *self {
            IoCompletion::Read { pid, .. } | IoCompletion::Write { pid } => pid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleOutput {
    pub pid: Pid,
    pub value: i32,
}

struct ConsoleState {
    /// pid -> logical address of its pending READ
    waiting: BTreeMap<Pid, i32>,
    output: Vec<ConsoleOutput>,
    irq: Sender<Interrupt>,
}

pub struct ConsoleService {
    state: Mutex<ConsoleState>,
}

impl ConsoleService {
    pub fn new(irq: Sender<Interrupt>) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                waiting: BTreeMap::new(),
                output: Vec::new(),
                irq,
            }),
        }
    }

    /// Serve one request whose latency has already passed.
    pub fn handle(&self, request: IoRequest) {
        let mut state = self.state.lock();
        match request.kind {
            IoKind::Read { addr } => {
                info!(
                    "[console] process {} waits for input (use `in {} <value>`)",
                    request.pid, request.pid
                );
                state.waiting.insert(request.pid, addr);
            }
            IoKind::Write { value } => {
                info!("[console] OUT from process {}: {}", request.pid, value);
                state.output.push(ConsoleOutput {
                    pid: request.pid,
                    value,
                });
                let done = IoCompletion::Write { pid: request.pid };
                if state.irq.send(Interrupt::IoDone(done)).is_err() {
                    warn!("[console] nobody is listening for completions");
                }
            }
        }
    }

    /// Complete the pending READ of `pid`. Returns false when `pid` is not
    /// waiting for input.
    pub fn provide_input(&self, pid: Pid, value: i32) -> bool {
        let mut state = self.state.lock();
        let addr = match state.waiting.remove(&pid) {
            Some(addr) => addr,
            None => return false,
        };
        debug!("[console] IN for process {}: {}", pid, value);
        let done = IoCompletion::Read { pid, addr, value };
        state.irq.send(Interrupt::IoDone(done)).is_ok()
    }

    /// Forget a pending READ, used when its process goes away.
    pub fn cancel(&self, pid: Pid) {
        self.state.lock().waiting.remove(&pid);
    }

    pub fn waiting(&self) -> Vec<Pid> {
        self.state.lock().waiting.keys().copied().collect()
    }

    pub fn output(&self) -> Vec<ConsoleOutput> {
        self.state.lock().output.clone()
    }
}

/// Start the console thread, serving `queue` with `latency` per request.
pub fn spawn(
    console: Arc<ConsoleService>,
    queue: Receiver<IoRequest>,
    latency: Duration,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("console".into()).spawn(move || {
        info!("[console] service started");
        while !stop.load(Ordering::Acquire) {
            match queue.recv_timeout(Duration::from_millis(IDLE_POLL_MS)) {
                Ok(request) => {
                    thread::sleep(latency);
                    console.handle(request);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("[console] service stopped");
    })
}
