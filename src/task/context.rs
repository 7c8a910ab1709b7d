use crate::config::REGISTER_COUNT;

/// CPU state saved in a [`TaskControlBlock`](super::TaskControlBlock) while
/// the task is off the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// logical address of the next instruction
    pub pc: usize,
    pub regs: [i32; REGISTER_COUNT],
}

impl TaskContext {
    /// a context that starts at logical address 0 with cleared registers
    pub fn init() -> Self {
        Self {
            pc: 0,
            regs: [0; REGISTER_COUNT],
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::init()
    }
}
