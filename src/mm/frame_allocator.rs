//! Implementation of [`FrameAllocator`] which
//! controls all the frames of physical memory.
//!
//! Every frame is free, occupied by one `(pid, page)` or, while a load is in
//! flight, occupied and locked. The victim is always the lowest-index frame
//! that is occupied and unlocked.

use super::{PhysPageNum, VirtPageNum};
use crate::task::Pid;
use core::fmt::{self, Display, Formatter};

/// The process page a frame is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: Pid,
    pub page: VirtPageNum,
}

impl FrameOwner {
    pub fn new(pid: Pid, page: VirtPageNum) -> Self {
        Self { pid, page }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    owner: Option<FrameOwner>,
    locked: bool,
}

/// Occupancy of one frame as reported to the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame: PhysPageNum,
    pub owner: Option<FrameOwner>,
    pub locked: bool,
}

impl Display for FrameInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(owner) => write!(
                f,
                "frame {:>3}: pid {:>3} page {:>3}{}",
                self.frame,
                owner.pid,
                owner.page,
                if self.locked { " (locked)" } else { "" }
            ),
            None => write!(f, "frame {:>3}: free", self.frame),
        }
    }
}

/// allocation and recycling in units of frames
pub trait FrameAllocator {
    fn new(frames: usize) -> Self;
    fn alloc(&mut self, owner: FrameOwner) -> Option<PhysPageNum>;
    fn dealloc(&mut self, ppn: PhysPageNum);
}

pub struct FrameTable {
    frames: Vec<Frame>,
}

impl FrameAllocator for FrameTable {
    fn new(frames: usize) -> Self {
        Self {
            frames: vec![Frame::default(); frames],
        }
    }

    /// lowest free, unlocked frame
    fn alloc(&mut self, owner: FrameOwner) -> Option<PhysPageNum> {
        let index = self
            .frames
            .iter()
            .position(|frame| frame.owner.is_none() && !frame.locked)?;
        let ppn = PhysPageNum(index);
        self.assign(ppn, owner);
        Some(ppn)
    }

    fn dealloc(&mut self, ppn: PhysPageNum) {
        if let Some(frame) = self.frames.get_mut(ppn.0) {
            *frame = Frame::default();
        }
    }
}

impl FrameTable {
    pub fn allocate(&mut self, owner: FrameOwner) -> Option<PhysPageNum> {
        self.alloc(owner)
    }

    pub fn deallocate(&mut self, ppn: PhysPageNum) {
        self.dealloc(ppn)
    }

    /// The lowest-index frame that is occupied and unlocked. `None` when
    /// every occupied frame is locked.
    pub fn select_victim(&self) -> Option<PhysPageNum> {
        self.frames
            .iter()
            .position(|frame| frame.owner.is_some() && !frame.locked)
            .map(PhysPageNum)
    }

    /// Bind `ppn` to `owner`, replacing whoever held it.
    pub fn assign(&mut self, ppn: PhysPageNum, owner: FrameOwner) {
        self.frames[ppn.0].owner = Some(owner);
    }

    pub fn lock(&mut self, ppn: PhysPageNum) {
        self.frames[ppn.0].locked = true;
    }

    pub fn unlock(&mut self, ppn: PhysPageNum) {
        self.frames[ppn.0].locked = false;
    }

    pub fn owner(&self, ppn: PhysPageNum) -> Option<FrameOwner> {
        self.frames.get(ppn.0).and_then(|frame| frame.owner)
    }

    pub fn is_locked(&self, ppn: PhysPageNum) -> bool {
        self.frames.get(ppn.0).map_or(false, |frame| frame.locked)
    }

    /// Free every frame bound to `pid`, locked or not.
    pub fn release_owner(&mut self, pid: Pid) -> Vec<PhysPageNum> {
        let owned: Vec<PhysPageNum> = (0..self.frames.len())
            .map(PhysPageNum)
            .filter(|&ppn| self.owner(ppn).map_or(false, |owner| owner.pid == pid))
            .collect();
        for &ppn in &owned {
            self.dealloc(ppn);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|frame| frame.owner.is_none())
            .count()
    }

    pub fn info(&self) -> Vec<FrameInfo> {
        self.frames
            .iter()
            .enumerate()
            .map(|(i, frame)| FrameInfo {
                frame: PhysPageNum(i),
                owner: frame.owner,
                locked: frame.locked,
            })
            .collect()
    }
}
