//! The swap disk and the thread that serves page transfers.
//!
//! The kernel reserves and releases slots under its own lock, the disk thread
//! reads and writes page contents. Both go through [`SwapDisk`], which keeps
//! its state behind a `spin::Mutex`.

use crate::config::IDLE_POLL_MS;
use crate::hw::Word;
use crate::mm::{PhysPageNum, VirtPageNum};
use crate::task::Pid;
use crate::trap::Interrupt;
use core::fmt::{self, Display, Formatter};
use core::time::Duration;
use spin::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Where the content of a page comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// a slot written by an earlier eviction
    Slot(usize),
    /// the page has never been evicted, read it from the program image
    Image(Arc<[Word]>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskOpKind {
    /// `slot` is `None` when the disk had no room at eviction time
    SavePage { data: Vec<Word>, slot: Option<usize> },
    LoadPage { source: LoadSource },
}

/// One queued page transfer. `pid`/`page` name the page being saved or
/// loaded, `frame` the physical frame it leaves or goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskOperation {
    pub pid: Pid,
    pub page: VirtPageNum,
    pub frame: PhysPageNum,
    pub kind: DiskOpKind,
}

impl DiskOperation {
    pub fn is_save(&self) -> bool {
        matches!(self.kind, DiskOpKind::SavePage { .. })
    }

    pub fn is_load(&self) -> bool {
        matches!(self.kind, DiskOpKind::LoadPage { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskResult {
    Loaded(Vec<Word>),
    Saved { slot: usize },
    /// the page could not be stored, its content is gone
    DiskFull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCompletion {
    pub pid: Pid,
    pub page: VirtPageNum,
    pub frame: PhysPageNum,
    pub result: DiskResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStats {
    pub slots: usize,
    pub slots_in_use: usize,
    pub pages_saved: usize,
    pub pages_loaded: usize,
    pub disk_full: usize,
}

impl Display for DiskStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slots {}/{} in use, {} pages saved, {} pages loaded, {} saves failed",
            self.slots_in_use, self.slots, self.pages_saved, self.pages_loaded, self.disk_full
        )
    }
}

struct SwapInner {
    slots: Vec<Option<Vec<Word>>>,
    reserved: Vec<bool>,
    stats: DiskStats,
}

pub struct SwapDisk {
    page_size: usize,
    inner: Mutex<SwapInner>,
}

impl SwapDisk {
    pub fn new(slots: usize, page_size: usize) -> Self {
        Self {
            page_size,
            inner: Mutex::new(SwapInner {
                slots: vec![None; slots],
                reserved: vec![false; slots],
                stats: DiskStats {
                    slots,
                    ..DiskStats::default()
                },
            }),
        }
    }

    /// Claim a free slot for a page about to be evicted.
    pub fn reserve(&self) -> Option<usize> {
        let mut inner = self.inner.lock();
        let slot = inner.reserved.iter().position(|used| !used)?;
        inner.reserved[slot] = true;
        inner.stats.slots_in_use += 1;
        Some(slot)
    }

    pub fn release(&self, slot: usize) {
        let mut inner = self.inner.lock();
        if inner.reserved.get(slot).copied().unwrap_or(false) {
            inner.reserved[slot] = false;
            inner.slots[slot] = None;
            inner.stats.slots_in_use -= 1;
        }
    }

    pub fn stats(&self) -> DiskStats {
        self.inner.lock().stats
    }

    /// Carry out one operation right away.
    pub fn perform(&self, op: DiskOperation) -> DiskCompletion {
        let result = match op.kind {
            DiskOpKind::SavePage { data, slot } => self.save(data, slot),
            DiskOpKind::LoadPage { source } => DiskResult::Loaded(self.load(op.page, source)),
        };
        DiskCompletion {
            pid: op.pid,
            page: op.page,
            frame: op.frame,
            result,
        }
    }

    fn save(&self, data: Vec<Word>, slot: Option<usize>) -> DiskResult {
        let mut inner = self.inner.lock();
        match slot {
            Some(slot) if slot < inner.slots.len() => {
                inner.slots[slot] = Some(data);
                inner.stats.pages_saved += 1;
                DiskResult::Saved { slot }
            }
            _ => {
                inner.stats.disk_full += 1;
                DiskResult::DiskFull
            }
        }
    }

    fn load(&self, page: VirtPageNum, source: LoadSource) -> Vec<Word> {
        let data = match source {
            LoadSource::Slot(slot) => {
                let inner = self.inner.lock();
                let data = inner.slots.get(slot).cloned().flatten();
                data.unwrap_or_default()
            }
            LoadSource::Image(image) => {
                let start = page.base(self.page_size).0.min(image.len());
                let end = (start + self.page_size).min(image.len());
                image[start..end].to_vec()
            }
        };
        self.inner.lock().stats.pages_loaded += 1;
        data
    }
}

/// Start the disk thread. It serves `queue` one operation at a time, waits
/// `latency` for each, and reports every completion on `irq`.
pub fn spawn(
    swap: Arc<SwapDisk>,
    queue: Receiver<DiskOperation>,
    irq: Sender<Interrupt>,
    latency: Duration,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("disk".into()).spawn(move || {
        info!("[disk] service started");
        while !stop.load(Ordering::Acquire) {
            let op = match queue.recv_timeout(Duration::from_millis(IDLE_POLL_MS)) {
                Ok(op) => op,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            debug!(
                "[disk] {} pid {} page {} frame {}",
                if op.is_save() { "save" } else { "load" },
                op.pid,
                op.page,
                op.frame
            );
            thread::sleep(latency);
            if stop.load(Ordering::Acquire) {
                break;
            }
            let done = swap.perform(op);
            if irq.send(Interrupt::DiskDone(done)).is_err() {
                break;
            }
        }
        info!("[disk] service stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: DiskOpKind) -> DiskOperation {
        DiskOperation {
            pid: 1,
            page: VirtPageNum(1),
            frame: PhysPageNum(0),
            kind,
        }
    }

    #[test]
    fn saved_page_comes_back() {
        let disk = SwapDisk::new(2, 4);
        let slot = disk.reserve().unwrap();
        let data = vec![Word::data(1), Word::data(2), Word::data(3), Word::data(4)];
        let done = disk.perform(op(DiskOpKind::SavePage {
            data: data.clone(),
            slot: Some(slot),
        }));
        assert_eq!(done.result, DiskResult::Saved { slot });

        let done = disk.perform(op(DiskOpKind::LoadPage {
            source: LoadSource::Slot(slot),
        }));
        assert_eq!(done.result, DiskResult::Loaded(data));
        let stats = disk.stats();
        assert_eq!((stats.pages_saved, stats.pages_loaded), (1, 1));
        assert_eq!(stats.slots_in_use, 1);
    }

    #[test]
    fn image_pages_are_cut_at_the_image_end() {
        let disk = SwapDisk::new(1, 4);
        let image: Arc<[Word]> = (0..6).map(Word::data).collect::<Vec<_>>().into();
        let done = disk.perform(op(DiskOpKind::LoadPage {
            source: LoadSource::Image(image),
        }));
        assert_eq!(
            done.result,
            DiskResult::Loaded(vec![Word::data(4), Word::data(5)])
        );
    }

    #[test]
    fn full_disk_reports_lost_page() {
        let disk = SwapDisk::new(1, 4);
        assert_eq!(disk.reserve(), Some(0));
        assert_eq!(disk.reserve(), None);
        let done = disk.perform(op(DiskOpKind::SavePage {
            data: vec![],
            slot: None,
        }));
        assert_eq!(done.result, DiskResult::DiskFull);
        assert_eq!(disk.stats().disk_full, 1);

        disk.release(0);
        disk.release(0);
        assert_eq!(disk.stats().slots_in_use, 0);
        assert_eq!(disk.reserve(), Some(0));
    }
}
