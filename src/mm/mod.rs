//! Memory management implementation
//!
//! Paged virtual memory on top of a flat physical memory. Every process has a
//! flat page table; its pages are brought in lazily on first touch and pushed
//! out to the swap disk when frames run out.
//!
//! [`MemoryManager::translate`] is the only way from a logical address to a
//! physical one. A miss starts the asynchronous load right there and reports
//! [`TranslateError::PageFault`]. The disk answers later through
//! [`MemoryManager::complete_load`] / [`MemoryManager::complete_save`].

mod address;
mod frame_allocator;
mod page_table;

pub use address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
pub use frame_allocator::{FrameAllocator, FrameInfo, FrameOwner, FrameTable};
pub use page_table::{PTEFlags, PageTable, PageTableEntry};

use crate::config::KernelConfig;
use crate::drivers::{DiskOpKind, DiskOperation, LoadSource, SwapDisk};
use crate::error::AuditError;
use crate::hw::{MemoryDump, PhysicalMemory, Word};
use crate::task::{Pid, TaskControlBlock, TaskManager};
use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// the page is on its way in, retry once it arrived
    #[error("page fault on page {page}")]
    PageFault { page: VirtPageNum },

    #[error("address outside the process")]
    InvalidAddress,

    /// no frame is free and every occupied one is locked
    #[error("no frame can be freed")]
    FramesExhausted,
}

pub struct MemoryManager {
    page_size: usize,
    memory: PhysicalMemory,
    frames: FrameTable,
    swap: Arc<SwapDisk>,
    disk: Sender<DiskOperation>,
    /// logical clock for `last_access`
    clock: u64,
}

impl MemoryManager {
    pub fn new(config: &KernelConfig, swap: Arc<SwapDisk>, disk: Sender<DiskOperation>) -> Self {
        Self {
            page_size: config.page_size,
            memory: PhysicalMemory::new(config.memory_words, config.page_size),
            frames: FrameTable::new(config.frame_count()),
            swap,
            disk,
            clock: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read(&self, pa: PhysAddr) -> Word {
        self.memory.read(pa)
    }

    pub fn write(&mut self, pa: PhysAddr, word: Word) {
        self.memory.write(pa, word);
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Translate logical address `va` of `pid`.
    ///
    /// An absent page gets its load queued (unless one is already in flight)
    /// and the call returns [`TranslateError::PageFault`]. Blocking the
    /// process is up to the caller.
    pub fn translate(
        &mut self,
        tasks: &mut TaskManager,
        pid: Pid,
        va: i32,
        write: bool,
    ) -> Result<PhysAddr, TranslateError> {
        let va = VirtAddr::from_logical(va).ok_or(TranslateError::InvalidAddress)?;
        let vpn = va.floor(self.page_size);
        let offset = va.page_offset(self.page_size);
        let now = self.tick();

        let pte = tasks
            .get_mut(pid)
            .and_then(|task| task.page_table.get_mut(vpn))
            .ok_or(TranslateError::InvalidAddress)?;
        if let Some(frame) = pte.frame() {
            pte.touch(now, write);
            let pa = frame.addr(self.page_size, offset);
            trace!("[kernel] pid {} {:?} -> {:?}", pid, va, pa);
            return Ok(pa);
        }
        if pte.is_loading() {
            return Err(TranslateError::PageFault { page: vpn });
        }
        self.start_load(tasks, pid, vpn)?;
        Err(TranslateError::PageFault { page: vpn })
    }

    /// Find a frame for `vpn` of `pid`, evicting if needed, and queue the
    /// load. The frame stays locked until the load completes.
    fn start_load(
        &mut self,
        tasks: &mut TaskManager,
        pid: Pid,
        vpn: VirtPageNum,
    ) -> Result<(), TranslateError> {
        let owner = FrameOwner::new(pid, vpn);
        let frame = match self.frames.allocate(owner) {
            Some(frame) => frame,
            None => {
                let victim = self
                    .frames
                    .select_victim()
                    .ok_or(TranslateError::FramesExhausted)?;
                self.evict(tasks, victim);
                self.frames.assign(victim, owner);
                victim
            }
        };
        self.frames.lock(frame);

        let task = tasks.get_mut(pid).ok_or(TranslateError::InvalidAddress)?;
        let pte = task
            .page_table
            .get_mut(vpn)
            .ok_or(TranslateError::InvalidAddress)?;
        pte.set_loading();
        let source = match pte.disk_slot() {
            Some(slot) => LoadSource::Slot(slot),
            None => LoadSource::Image(task.image.clone()),
        };
        debug!(
            "[kernel] page fault: pid {} page {} -> frame {} from {}",
            pid,
            vpn,
            frame,
            match &source {
                LoadSource::Slot(slot) => format!("slot {}", slot),
                LoadSource::Image(_) => "image".to_string(),
            }
        );
        self.submit(DiskOperation {
            pid,
            page: vpn,
            frame,
            kind: DiskOpKind::LoadPage { source },
        });
        Ok(())
    }

    /// Take `frame` away from its owner and queue the save of its content.
    fn evict(&mut self, tasks: &mut TaskManager, frame: PhysPageNum) {
        let owner = match self.frames.owner(frame) {
            Some(owner) => owner,
            None => return,
        };
        self.frames.lock(frame);
        let pte = match tasks
            .get_mut(owner.pid)
            .and_then(|task| task.page_table.get_mut(owner.page))
        {
            Some(pte) => pte,
            None => return,
        };
        pte.set_absent();
        let slot = pte.disk_slot().or_else(|| self.swap.reserve());
        pte.set_disk_slot(slot);
        if slot.is_none() {
            warn!(
                "[kernel] swap disk is full, pid {} page {} will be lost",
                owner.pid, owner.page
            );
        }
        debug!(
            "[kernel] evict pid {} page {} from frame {} to slot {:?}",
            owner.pid, owner.page, frame, slot
        );
        let data = self.memory.frame(frame);
        self.submit(DiskOperation {
            pid: owner.pid,
            page: owner.page,
            frame,
            kind: DiskOpKind::SavePage { data, slot },
        });
    }

    fn submit(&self, op: DiskOperation) {
        if self.disk.send(op).is_err() {
            warn!("[kernel] disk service is gone, operation dropped");
        }
    }

    /// Install the first page of a new process synchronously. Returns false
    /// when no frame is free, the page is then loaded on first touch.
    pub fn load_initial(&mut self, task: &mut TaskControlBlock) -> bool {
        let vpn = VirtPageNum(0);
        let frame = match self.frames.allocate(FrameOwner::new(task.pid, vpn)) {
            Some(frame) => frame,
            None => return false,
        };
        let end = self.page_size.min(task.image.len());
        self.memory.fill_frame(frame, &task.image[..end]);
        let now = self.tick();
        match task.page_table.get_mut(vpn) {
            Some(pte) => {
                pte.set_present(frame, now);
                true
            }
            None => {
                self.frames.deallocate(frame);
                false
            }
        }
    }

    /// A load finished. Returns the pid to wake up, or `None` when the
    /// completion is stale (process gone or frame reassigned).
    pub fn complete_load(
        &mut self,
        tasks: &mut TaskManager,
        pid: Pid,
        page: VirtPageNum,
        frame: PhysPageNum,
        data: &[Word],
    ) -> Option<Pid> {
        if self.frames.owner(frame) != Some(FrameOwner::new(pid, page)) {
            debug!(
                "[kernel] stale load of pid {} page {} into frame {} ignored",
                pid, page, frame
            );
            return None;
        }
        let now = self.tick();
        let page_size = self.page_size;
        let task = tasks.get_mut(pid)?;
        let pte = task.page_table.get_mut(page)?;
        self.memory.fill_frame(frame, data);
        pte.set_present(frame, now);
        self.frames.unlock(frame);

        if let Some((va, value)) = task.pending_input {
            if va.floor(page_size) == page {
                let pa = frame.addr(page_size, va.page_offset(page_size));
                self.memory.write(pa, Word::data(value));
                pte.touch(now, true);
                task.pending_input = None;
            }
        }
        debug!("[kernel] pid {} page {} loaded into frame {}", pid, page, frame);
        Some(pid)
    }

    /// A save finished at `slot`. The slot was recorded at eviction time, so
    /// only a victim that is still absent needs it again.
    pub fn complete_save(
        &mut self,
        tasks: &mut TaskManager,
        pid: Pid,
        page: VirtPageNum,
        slot: usize,
    ) {
        if let Some(pte) = tasks
            .get_mut(pid)
            .and_then(|task| task.page_table.get_mut(page))
        {
            if !pte.is_present() && pte.disk_slot().is_none() {
                pte.set_disk_slot(Some(slot));
            }
        }
    }

    /// Give back every frame and swap slot of a terminated process.
    pub fn release(&mut self, task: &TaskControlBlock) {
        let frames = self.frames.release_owner(task.pid);
        let slots: Vec<usize> = task
            .page_table
            .iter()
            .filter_map(|(_, pte)| pte.disk_slot())
            .collect();
        for &slot in &slots {
            self.swap.release(slot);
        }
        debug!(
            "[kernel] pid {} released frames {:?} and slots {:?}",
            task.pid, frames, slots
        );
    }

    pub fn frames(&self) -> Vec<FrameInfo> {
        self.frames.info()
    }

    pub fn free_frames(&self) -> usize {
        self.frames.free_count()
    }

    pub fn dump(&self, start: usize, end: usize) -> MemoryDump {
        self.memory.dump(start, end)
    }

    /// Every present page must own its frame, and no frame may be claimed by
    /// two present pages.
    pub fn audit(&self, tasks: &TaskManager) -> Result<(), AuditError> {
        let mut claimed: BTreeMap<PhysPageNum, Pid> = BTreeMap::new();
        for task in tasks.iter() {
            for (page, pte) in task.page_table.iter() {
                let frame = match pte.frame() {
                    Some(frame) => frame,
                    None => continue,
                };
                if let Some(&first) = claimed.get(&frame) {
                    return Err(AuditError::FrameClaimedTwice {
                        frame,
                        first,
                        second: task.pid,
                    });
                }
                claimed.insert(frame, task.pid);
                if self.frames.owner(frame) != Some(FrameOwner::new(task.pid, page)) {
                    return Err(AuditError::OwnerMismatch {
                        pid: task.pid,
                        page,
                        frame,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::get_program;
    use std::sync::mpsc::{channel, Receiver};

    fn setup(memory_words: usize) -> (MemoryManager, TaskManager, Receiver<DiskOperation>) {
        let config = KernelConfig {
            memory_words,
            ..KernelConfig::default()
        };
        let (tx, rx) = channel();
        let swap = Arc::new(SwapDisk::new(config.swap_slots, config.page_size));
        let mut mm = MemoryManager::new(&config, swap, tx);
        let mut tasks = TaskManager::new(true);
        let program = get_program("fibonacci10").unwrap();
        let mut task = TaskControlBlock::new(1, &program, config.page_size);
        assert!(mm.load_initial(&mut task));
        tasks.insert(task);
        (mm, tasks, rx)
    }

    #[test]
    fn repeated_faults_queue_one_load() {
        let (mut mm, mut tasks, rx) = setup(64);
        let fault = Err(TranslateError::PageFault {
            page: VirtPageNum(2),
        });
        assert_eq!(mm.translate(&mut tasks, 1, 20, false), fault);
        assert_eq!(mm.translate(&mut tasks, 1, 21, true), fault);
        let ops: Vec<_> = rx.try_iter().collect();
        assert_eq!(ops.len(), 1);
        assert_eq!(mm.free_frames(), 6);

        let frame = ops[0].frame;
        let data = vec![Word::data(4); 8];
        assert_eq!(
            mm.complete_load(&mut tasks, 1, VirtPageNum(2), frame, &data),
            Some(1)
        );
        let pa = mm.translate(&mut tasks, 1, 21, false).unwrap();
        assert_eq!(mm.read(pa), Word::data(4));
        mm.audit(&tasks).unwrap();
    }

    #[test]
    fn eviction_queues_save_then_load() {
        // two frames: page 0 resident, page 2 loading
        let (mut mm, mut tasks, rx) = setup(16);
        assert!(mm.translate(&mut tasks, 1, 20, false).is_err());
        let first: Vec<_> = rx.try_iter().collect();
        assert_eq!(first.len(), 1);

        assert!(mm.translate(&mut tasks, 1, 8, false).is_err());
        let ops: Vec<_> = rx.try_iter().collect();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].is_save() && ops[1].is_load());
        assert_eq!(ops[0].page, VirtPageNum(0));
        assert_eq!(ops[1].page, VirtPageNum(1));
        assert_eq!(ops[0].frame, ops[1].frame);

        let pte = tasks.get(1).unwrap().page_table.get(VirtPageNum(0)).unwrap();
        assert!(!pte.is_present());
        assert_eq!(pte.disk_slot(), Some(0));

        // both frames are locked now
        assert_eq!(
            mm.translate(&mut tasks, 1, 24, false),
            Err(TranslateError::FramesExhausted)
        );
    }

    #[test]
    fn stale_load_is_ignored() {
        let (mut mm, mut tasks, rx) = setup(64);
        assert!(mm.translate(&mut tasks, 1, 20, false).is_err());
        let op = rx.try_iter().next().unwrap();
        let task = tasks.remove_process(1, crate::task::Cause::Removed).unwrap();
        mm.release(&task);
        assert_eq!(
            mm.complete_load(&mut tasks, 1, op.page, op.frame, &[]),
            None
        );
        assert_eq!(mm.free_frames(), 8);
    }
}
