//! Implementation of physical and virtual address and page number.
//!
//! Addresses count words, not bytes. The page size is a runtime setting, so
//! every conversion between an address and a page number takes it explicitly.

use core::fmt::{self, Debug, Display, Formatter};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
/// Physical address, an index into physical memory.
pub struct PhysAddr(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
/// Virtual (logical) address inside one process.
pub struct VirtAddr(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
/// Physical page number, i.e. a frame index.
pub struct PhysPageNum(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
/// Virtual page number inside one process.
pub struct VirtPageNum(pub usize);

/// Debugging
impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{}", self.0))
    }
}
impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{}", self.0))
    }
}
impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PA:{}", self.0))
    }
}
impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PPN:{}", self.0))
    }
}

impl Display for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Display for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl VirtAddr {
    /// A logical address as the CPU produces it. Negative values have no
    /// page and are rejected.
    pub fn from_logical(addr: i32) -> Option<Self> {
        usize::try_from(addr).ok().map(Self)
    }
    pub fn floor(&self, page_size: usize) -> VirtPageNum {
        VirtPageNum(self.0 / page_size)
    }
    pub fn page_offset(&self, page_size: usize) -> usize {
        self.0 % page_size
    }
}

impl VirtPageNum {
    /// first logical address of the page
    pub fn base(&self, page_size: usize) -> VirtAddr {
        VirtAddr(self.0 * page_size)
    }
}

impl PhysPageNum {
    /// address of word `offset` inside this frame
    pub fn addr(&self, page_size: usize, offset: usize) -> PhysAddr {
        PhysAddr(self.0 * page_size + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join() {
        let va = VirtAddr(21);
        assert_eq!(va.floor(8), VirtPageNum(2));
        assert_eq!(va.page_offset(8), 5);
        assert_eq!(PhysPageNum(3).addr(8, 5), PhysAddr(29));
        assert_eq!(VirtPageNum(2).base(8), VirtAddr(16));
        assert_eq!(VirtAddr::from_logical(-1), None);
    }
}
