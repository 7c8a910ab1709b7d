//! Fetch-decode-execute loop of the virtual CPU.
//!
//! The CPU never touches physical memory itself. Every fetch and every data
//! access goes through a [`Bus`], which the kernel backs with the running
//! process's page table. A failed access aborts the instruction before any
//! register, the pc or memory changes, so the instruction can simply be
//! executed again once the page is in.

use super::{Opcode, Word};
use crate::config::{MAX_INT, MIN_INT, REGISTER_COUNT, SYSCALL_ARG_REG, SYSCALL_REG};
use crate::drivers::IoKind;
use crate::mm::TranslateError;
use crate::task::TaskContext;
use crate::timer::TimeSlice;
use crate::trap::Interrupt;

/// `r8` value requesting console input
pub const SYSCALL_IN: i32 = 1;
/// `r8` value requesting console output
pub const SYSCALL_OUT: i32 = 2;

/// Memory and device access of the process on the CPU, in logical addresses.
pub trait Bus {
    fn read(&mut self, va: i32) -> Result<Word, TranslateError>;
    fn write(&mut self, va: i32, word: Word) -> Result<(), TranslateError>;
    /// make sure `va` is resident and writable without changing it
    fn probe_write(&mut self, va: i32) -> Result<(), TranslateError>;
    fn request_io(&mut self, kind: IoKind);
    /// logical size of the process in words, the bound for jump targets
    fn limit(&self) -> usize;
}

/// What a successfully executed instruction does to the pc.
enum Flow {
    Next,
    Jump(usize),
    /// advance, then wait for a device
    Wait,
}

pub struct Cpu {
    cx: TaskContext,
    slice: TimeSlice,
}

impl Cpu {
    pub fn new(time_slice: usize) -> Self {
        Self {
            cx: TaskContext::init(),
            slice: TimeSlice::new(time_slice),
        }
    }

    /// Put a saved context on the CPU and start a fresh time slice.
    pub fn load(&mut self, cx: TaskContext) {
        self.cx = cx;
        self.slice.reset();
    }

    pub fn context(&self) -> TaskContext {
        self.cx
    }

    /// Execute one instruction. Returns the interrupt it raised, if any.
    ///
    /// The timer only fires on instructions that raised nothing else.
    pub fn step(&mut self, bus: &mut impl Bus) -> Option<Interrupt> {
        let ir = match bus.read(self.cx.pc as i32) {
            Ok(word) => word,
            Err(e) => return Some(e.into()),
        };
        trace!("[cpu] pc {:>4}: {}", self.cx.pc, ir);
        match self.execute(ir, bus) {
            Ok(Flow::Next) => self.cx.pc += 1,
            Ok(Flow::Jump(target)) => self.cx.pc = target,
            Ok(Flow::Wait) => {
                self.cx.pc += 1;
                return Some(Interrupt::IoWait);
            }
            Err(irq) => return Some(irq),
        }
        if self.slice.tick() {
            return Some(Interrupt::Timer);
        }
        None
    }

    fn execute(&mut self, ir: Word, bus: &mut impl Bus) -> Result<Flow, Interrupt> {
        let flow = match ir.opc {
            Opcode::Ldi => {
                self.set(ir.ra, ir.p)?;
                Flow::Next
            }
            Opcode::Ldd => {
                self.check(ir.ra)?;
                let word = bus.read(ir.p)?;
                self.set(ir.ra, word.p)?;
                Flow::Next
            }
            Opcode::Ldx => {
                self.check(ir.ra)?;
                let addr = self.reg(ir.rb)?;
                let word = bus.read(addr)?;
                self.set(ir.ra, word.p)?;
                Flow::Next
            }
            Opcode::Std => {
                let value = self.reg(ir.ra)?;
                bus.write(ir.p, Word::data(value))?;
                Flow::Next
            }
            Opcode::Stx => {
                let addr = self.reg(ir.ra)?;
                let value = self.reg(ir.rb)?;
                bus.write(addr, Word::data(value))?;
                Flow::Next
            }
            Opcode::Move => {
                let value = self.reg(ir.rb)?;
                self.set(ir.ra, value)?;
                Flow::Next
            }
            Opcode::Add => {
                let b = i64::from(self.reg(ir.rb)?);
                self.arith(ir.ra, |a| a + b)?
            }
            Opcode::Addi => self.arith(ir.ra, |a| a + i64::from(ir.p))?,
            Opcode::Sub => {
                let b = i64::from(self.reg(ir.rb)?);
                self.arith(ir.ra, |a| a - b)?
            }
            Opcode::Subi => self.arith(ir.ra, |a| a - i64::from(ir.p))?,
            Opcode::Mult => {
                let b = i64::from(self.reg(ir.rb)?);
                self.arith(ir.ra, |a| a * b)?
            }
            Opcode::Jmp => Flow::Jump(jump_target(ir.p, &*bus)?),
            Opcode::Jmpi => Flow::Jump(jump_target(self.reg(ir.ra)?, &*bus)?),
            Opcode::Jmpig => self.jump_if(self.reg(ir.rb)? > 0, self.reg(ir.ra)?, &*bus)?,
            Opcode::Jmpil => self.jump_if(self.reg(ir.rb)? < 0, self.reg(ir.ra)?, &*bus)?,
            Opcode::Jmpie => self.jump_if(self.reg(ir.rb)? == 0, self.reg(ir.ra)?, &*bus)?,
            Opcode::Jmpim => {
                let target = bus.read(ir.p)?.p;
                Flow::Jump(jump_target(target, &*bus)?)
            }
            Opcode::Jmpigm => self.jump_indirect_if(self.reg(ir.rb)? > 0, ir.p, bus)?,
            Opcode::Jmpilm => self.jump_indirect_if(self.reg(ir.rb)? < 0, ir.p, bus)?,
            Opcode::Jmpiem => self.jump_indirect_if(self.reg(ir.rb)? == 0, ir.p, bus)?,
            Opcode::Jmpigk => self.jump_if(self.reg(ir.rb)? > 0, ir.p, &*bus)?,
            Opcode::Jmpilk => self.jump_if(self.reg(ir.rb)? < 0, ir.p, &*bus)?,
            Opcode::Jmpiek => self.jump_if(self.reg(ir.rb)? == 0, ir.p, &*bus)?,
            Opcode::Jmpigt => self.jump_if(self.reg(ir.ra)? > self.reg(ir.rb)?, ir.p, &*bus)?,
            Opcode::Syscall => {
                let addr = self.reg(SYSCALL_ARG_REG)?;
                match self.reg(SYSCALL_REG)? {
                    SYSCALL_IN => {
                        bus.probe_write(addr)?;
                        bus.request_io(IoKind::Read { addr });
                    }
                    SYSCALL_OUT => {
                        let value = bus.read(addr)?.p;
                        bus.request_io(IoKind::Write { value });
                    }
                    _ => return Err(Interrupt::InvalidInstruction),
                }
                Flow::Wait
            }
            Opcode::Stop => return Err(Interrupt::Stop),
            Opcode::Data | Opcode::Empty => return Err(Interrupt::InvalidInstruction),
        };
        Ok(flow)
    }

    fn check(&self, r: usize) -> Result<(), Interrupt> {
        if r < REGISTER_COUNT {
            Ok(())
        } else {
            Err(Interrupt::InvalidInstruction)
        }
    }

    fn reg(&self, r: usize) -> Result<i32, Interrupt> {
        self.check(r)?;
        Ok(self.cx.regs[r])
    }

    fn set(&mut self, r: usize, value: i32) -> Result<(), Interrupt> {
        self.check(r)?;
        self.cx.regs[r] = value;
        Ok(())
    }

    /// `r[ra] = op(r[ra])`, leaving `r[ra]` untouched on overflow
    fn arith(&mut self, ra: usize, op: impl FnOnce(i64) -> i64) -> Result<Flow, Interrupt> {
        let result = op(i64::from(self.reg(ra)?));
        if result < i64::from(MIN_INT) || result > i64::from(MAX_INT) {
            return Err(Interrupt::Overflow);
        }
        self.set(ra, result as i32)?;
        Ok(Flow::Next)
    }

    fn jump_if(&self, taken: bool, target: i32, bus: &impl Bus) -> Result<Flow, Interrupt> {
        if !taken {
            return Ok(Flow::Next);
        }
        Ok(Flow::Jump(jump_target(target, bus)?))
    }

    fn jump_indirect_if(
        &self,
        taken: bool,
        p: i32,
        bus: &mut impl Bus,
    ) -> Result<Flow, Interrupt> {
        if !taken {
            return Ok(Flow::Next);
        }
        let target = bus.read(p)?.p;
        Ok(Flow::Jump(jump_target(target, &*bus)?))
    }
}

fn jump_target(target: i32, bus: &impl Bus) -> Result<usize, Interrupt> {
    if target < 0 || target as usize >= bus.limit() {
        return Err(Interrupt::InvalidAddress);
    }
    Ok(target as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::VirtPageNum;

    /// flat memory without paging; addresses in `absent` fault once
    struct FlatBus {
        words: Vec<Word>,
        absent: Vec<i32>,
        io: Vec<IoKind>,
    }

    impl FlatBus {
        fn new(program: &[Word], size: usize) -> Self {
            let mut words = program.to_vec();
            words.resize(size, Word::data(0));
            Self {
                words,
                absent: Vec::new(),
                io: Vec::new(),
            }
        }

        fn access(&mut self, va: i32) -> Result<usize, TranslateError> {
            if va < 0 || va as usize >= self.words.len() {
                return Err(TranslateError::InvalidAddress);
            }
            if let Some(i) = self.absent.iter().position(|&a| a == va) {
                self.absent.remove(i);
                return Err(TranslateError::PageFault {
                    page: VirtPageNum(va as usize / 8),
                });
            }
            Ok(va as usize)
        }
    }

    impl Bus for FlatBus {
        fn read(&mut self, va: i32) -> Result<Word, TranslateError> {
            let i = self.access(va)?;
            Ok(self.words[i])
        }
        fn write(&mut self, va: i32, word: Word) -> Result<(), TranslateError> {
            let i = self.access(va)?;
            self.words[i] = word;
            Ok(())
        }
        fn probe_write(&mut self, va: i32) -> Result<(), TranslateError> {
            self.access(va).map(|_| ())
        }
        fn request_io(&mut self, kind: IoKind) {
            self.io.push(kind);
        }
        fn limit(&self) -> usize {
            self.words.len()
        }
    }

    fn run(cpu: &mut Cpu, bus: &mut FlatBus) -> Interrupt {
        for _ in 0..1000 {
            match cpu.step(bus) {
                None | Some(Interrupt::Timer) => continue,
                Some(irq) => return irq,
            }
        }
        panic!("program did not stop");
    }

    #[test]
    fn factorial_loop() {
        let program = [
            Word::new(Opcode::Ldi, 0, 0, 5),
            Word::new(Opcode::Ldi, 1, 0, 1),
            Word::new(Opcode::Mult, 1, 0, 0),
            Word::new(Opcode::Subi, 0, 0, 1),
            Word::new(Opcode::Jmpigk, 0, 0, 2),
            Word::new(Opcode::Std, 1, 0, 10),
            Word::new(Opcode::Stop, 0, 0, 0),
        ];
        let mut bus = FlatBus::new(&program, 16);
        let mut cpu = Cpu::new(4);
        assert_eq!(run(&mut cpu, &mut bus), Interrupt::Stop);
        assert_eq!(bus.words[10], Word::data(120));
    }

    #[test]
    fn timer_fires_after_slice() {
        let program = [Word::new(Opcode::Ldi, 0, 0, 1); 4];
        let mut bus = FlatBus::new(&program, 8);
        let mut cpu = Cpu::new(2);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.step(&mut bus), Some(Interrupt::Timer));
        assert_eq!(cpu.context().pc, 2);
    }

    #[test]
    fn faulting_instruction_is_retried() {
        let program = [
            Word::new(Opcode::Ldi, 0, 0, 42),
            Word::new(Opcode::Std, 0, 0, 12),
            Word::new(Opcode::Stop, 0, 0, 0),
        ];
        let mut bus = FlatBus::new(&program, 16);
        bus.absent.push(12);
        let mut cpu = Cpu::new(10);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(
            cpu.step(&mut bus),
            Some(Interrupt::PageFault {
                page: VirtPageNum(1)
            })
        );
        assert_eq!(cpu.context().pc, 1);
        assert_eq!(bus.words[12], Word::data(0));
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(bus.words[12], Word::data(42));
        assert_eq!(cpu.step(&mut bus), Some(Interrupt::Stop));
    }

    #[test]
    fn overflow_leaves_register_untouched() {
        let program = [
            Word::new(Opcode::Ldi, 3, 0, MAX_INT),
            Word::new(Opcode::Addi, 3, 0, 1),
        ];
        let mut bus = FlatBus::new(&program, 8);
        let mut cpu = Cpu::new(10);
        assert_eq!(run(&mut cpu, &mut bus), Interrupt::Overflow);
        assert_eq!(cpu.context().regs[3], MAX_INT);
        assert_eq!(cpu.context().pc, 1);
    }

    #[test]
    fn jump_outside_process_is_invalid() {
        let program = [Word::new(Opcode::Jmp, 0, 0, 100)];
        let mut bus = FlatBus::new(&program, 8);
        let mut cpu = Cpu::new(10);
        assert_eq!(cpu.step(&mut bus), Some(Interrupt::InvalidAddress));
    }

    #[test]
    fn data_and_bad_registers_are_invalid_instructions() {
        let mut bus = FlatBus::new(&[Word::data(3)], 8);
        let mut cpu = Cpu::new(10);
        assert_eq!(cpu.step(&mut bus), Some(Interrupt::InvalidInstruction));

        let mut bus = FlatBus::new(&[Word::new(Opcode::Ldi, REGISTER_COUNT, 0, 1)], 8);
        let mut cpu = Cpu::new(10);
        assert_eq!(cpu.step(&mut bus), Some(Interrupt::InvalidInstruction));
    }

    #[test]
    fn syscalls_request_io_and_wait() {
        let program = [
            Word::new(Opcode::Ldi, SYSCALL_REG, 0, SYSCALL_IN),
            Word::new(Opcode::Ldi, SYSCALL_ARG_REG, 0, 7),
            Word::new(Opcode::Syscall, 0, 0, 0),
            Word::new(Opcode::Ldi, SYSCALL_REG, 0, SYSCALL_OUT),
            Word::new(Opcode::Syscall, 0, 0, 0),
            Word::new(Opcode::Stop, 0, 0, 0),
        ];
        let mut bus = FlatBus::new(&program, 8);
        bus.words[7] = Word::data(9);
        let mut cpu = Cpu::new(100);
        assert_eq!(run(&mut cpu, &mut bus), Interrupt::IoWait);
        assert_eq!(cpu.context().pc, 3);
        assert_eq!(run(&mut cpu, &mut bus), Interrupt::IoWait);
        assert_eq!(cpu.context().pc, 5);
        assert_eq!(
            bus.io,
            vec![IoKind::Read { addr: 7 }, IoKind::Write { value: 9 }]
        );
    }

    #[test]
    fn unknown_syscall_is_invalid() {
        let program = [
            Word::new(Opcode::Ldi, SYSCALL_REG, 0, 7),
            Word::new(Opcode::Syscall, 0, 0, 0),
        ];
        let mut bus = FlatBus::new(&program, 8);
        let mut cpu = Cpu::new(100);
        assert_eq!(run(&mut cpu, &mut bus), Interrupt::InvalidInstruction);
        assert!(bus.io.is_empty());
    }
}
