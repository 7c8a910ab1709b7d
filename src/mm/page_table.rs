use super::{PhysPageNum, VirtPageNum};
use bitflags::*;
use core::fmt::{self, Display, Formatter};

bitflags! {
    pub struct PTEFlags: u8 {
        /// the page sits in a physical frame
        const PRESENT = 1 << 0;
        /// written since it was loaded
        const MODIFIED = 1 << 1;
        /// a load for this page is queued on the disk
        const LOADING = 1 << 2;
    }
}

/// One logical page of a process.
///
/// `frame` is only meaningful while the page is present. `disk_slot` is
/// `None` until the page is evicted for the first time, in which case it
/// still has to come from the program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    flags: PTEFlags,
    frame: Option<PhysPageNum>,
    disk_slot: Option<usize>,
    last_access: u64,
}

impl PageTableEntry {
    /// absent, never loaded
    pub fn empty() -> Self {
        Self {
            flags: PTEFlags::empty(),
            frame: None,
            disk_slot: None,
            last_access: 0,
        }
    }

    pub fn is_present(&self) -> bool {
        self.flags.contains(PTEFlags::PRESENT)
    }

    pub fn is_loading(&self) -> bool {
        self.flags.contains(PTEFlags::LOADING)
    }

    pub fn is_modified(&self) -> bool {
        self.flags.contains(PTEFlags::MODIFIED)
    }

    /// the frame holding the page, if it is present
    pub fn frame(&self) -> Option<PhysPageNum> {
        if self.is_present() {
            self.frame
        } else {
            None
        }
    }

    pub fn disk_slot(&self) -> Option<usize> {
        self.disk_slot
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    /// The page has arrived in `frame`: present, clean and no longer loading.
    pub fn set_present(&mut self, frame: PhysPageNum, now: u64) {
        self.flags.insert(PTEFlags::PRESENT);
        self.flags.remove(PTEFlags::LOADING | PTEFlags::MODIFIED);
        self.frame = Some(frame);
        self.last_access = now;
    }

    /// The page lost its frame.
    pub fn set_absent(&mut self) {
        self.flags.remove(PTEFlags::PRESENT | PTEFlags::MODIFIED);
        self.frame = None;
    }

    pub fn set_loading(&mut self) {
        self.flags.insert(PTEFlags::LOADING);
    }

    pub fn set_disk_slot(&mut self, slot: Option<usize>) {
        self.disk_slot = slot;
    }

    /// record an access, marking the page dirty on writes
    pub fn touch(&mut self, now: u64, write: bool) {
        self.last_access = now;
        if write {
            self.flags.insert(PTEFlags::MODIFIED);
        }
    }
}

/// Flat per-process page table, one entry per logical page.
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    pub fn new(pages: usize) -> Self {
        Self {
            entries: vec![PageTableEntry::empty(); pages],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&PageTableEntry> {
        self.entries.get(vpn.0)
    }

    pub fn get_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(vpn.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VirtPageNum, &PageTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, pte)| (VirtPageNum(i), pte))
    }

    pub fn present_pages(&self) -> usize {
        self.entries.iter().filter(|pte| pte.is_present()).count()
    }
}

/// `{[page,frame|-,mp|ms|--],...}`, where `mp` means in memory, `ms` on the
/// swap disk and `--` never loaded.
impl Display for PageTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (vpn, pte)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            let place = if pte.is_present() {
                "mp"
            } else if pte.disk_slot().is_some() {
                "ms"
            } else {
                "--"
            };
            match pte.frame() {
                Some(frame) => write!(f, "[{},{},{}]", vpn, frame, place)?,
                None => write!(f, "[{},-,{}]", vpn, place)?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_entry_lifecycle() {
        let mut pte = PageTableEntry::empty();
        assert!(!pte.is_present());
        assert_eq!(pte.frame(), None);

        pte.set_loading();
        assert!(pte.is_loading());
        pte.set_present(PhysPageNum(3), 7);
        assert!(pte.is_present() && !pte.is_loading());
        assert_eq!(pte.frame(), Some(PhysPageNum(3)));

        pte.touch(9, true);
        assert!(pte.is_modified());
        assert_eq!(pte.last_access(), 9);

        pte.set_disk_slot(Some(4));
        pte.set_absent();
        assert_eq!(pte.frame(), None);
        assert!(!pte.is_modified());
        assert_eq!(pte.disk_slot(), Some(4));
    }

    #[test]
    fn summary_format() {
        let mut table = PageTable::new(3);
        table
            .get_mut(VirtPageNum(0))
            .unwrap()
            .set_present(PhysPageNum(5), 0);
        table.get_mut(VirtPageNum(2)).unwrap().set_disk_slot(Some(1));
        assert_eq!(table.to_string(), "{[0,5,mp],[1,-,--],[2,-,ms]}");
        assert_eq!(table.present_pages(), 1);
        assert!(table.get(VirtPageNum(3)).is_none());
    }
}
