//! Instruction-counting preemption timer.
//!
//! Time here is logical: a slice is a number of executed instructions, not a
//! wall-clock interval.

#[derive(Debug, Clone, Copy)]
pub struct TimeSlice {
    delta: usize,
    count: usize,
}

impl TimeSlice {
    pub fn new(delta: usize) -> Self {
        Self { delta, count: 0 }
    }

    /// Count one executed instruction. Returns true when the slice is used up,
    /// after which the counter starts over.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.delta {
            self.count = 0;
            return true;
        }
        false
    }

    /// start a fresh slice, called on every dispatch
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_every_delta_ticks() {
        let mut slice = TimeSlice::new(3);
        assert!(!slice.tick());
        assert!(!slice.tick());
        assert!(slice.tick());
        assert!(!slice.tick());
        slice.reset();
        assert!(!slice.tick());
        assert!(!slice.tick());
        assert!(slice.tick());
    }
}
