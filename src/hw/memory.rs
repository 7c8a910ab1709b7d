use super::Word;
use crate::mm::{PhysAddr, PhysPageNum};
use core::fmt::{self, Display, Formatter};

/// The machine's physical memory, a flat array of [`Word`]s split into
/// frames of `page_size` words.
pub struct PhysicalMemory {
    words: Vec<Word>,
    page_size: usize,
}

impl PhysicalMemory {
    pub fn new(size: usize, page_size: usize) -> Self {
        Self {
            words: vec![Word::EMPTY; size],
            page_size,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// `pa` must come from a successful translation
    pub fn read(&self, pa: PhysAddr) -> Word {
        self.words[pa.0]
    }

    pub fn write(&mut self, pa: PhysAddr, word: Word) {
        self.words[pa.0] = word;
    }

    fn frame_range(&self, ppn: PhysPageNum) -> core::ops::Range<usize> {
        let start = ppn.0 * self.page_size;
        start..start + self.page_size
    }

    /// copy a whole frame out
    pub fn frame(&self, ppn: PhysPageNum) -> Vec<Word> {
        self.words[self.frame_range(ppn)].to_vec()
    }

    /// Fill a frame from `data`. Cells past the end of `data` become `DATA 0`.
    pub fn fill_frame(&mut self, ppn: PhysPageNum, data: &[Word]) {
        let range = self.frame_range(ppn);
        for (i, cell) in self.words[range].iter_mut().enumerate() {
            *cell = data.get(i).copied().unwrap_or(Word::data(0));
        }
    }

    /// Words in `[start, end)`, clamped to the memory size.
    pub fn dump(&self, start: usize, end: usize) -> MemoryDump {
        let end = end.min(self.words.len());
        let start = start.min(end);
        MemoryDump {
            start,
            words: self.words[start..end].to_vec(),
        }
    }
}

/// A copied range of physical memory.
#[derive(Debug, Clone)]
pub struct MemoryDump {
    pub start: usize,
    pub words: Vec<Word>,
}

impl Display for MemoryDump {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, word) in self.words.iter().enumerate() {
            writeln!(f, "{:>5}:  {}", self.start + i, word)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_frame_pads_with_zero_data() {
        let mut memory = PhysicalMemory::new(16, 8);
        memory.fill_frame(PhysPageNum(1), &[Word::data(7)]);
        assert_eq!(memory.read(PhysAddr(8)), Word::data(7));
        assert_eq!(memory.read(PhysAddr(9)), Word::data(0));
        assert_eq!(memory.read(PhysAddr(0)), Word::EMPTY);
        assert_eq!(memory.frame(PhysPageNum(1)).len(), 8);
    }

    #[test]
    fn dump_is_clamped() {
        let memory = PhysicalMemory::new(16, 8);
        assert_eq!(memory.dump(10, 100).words.len(), 6);
        assert!(memory.dump(40, 50).words.is_empty());
    }
}
