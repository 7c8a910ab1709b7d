//! A memory cell of the simulated machine.
//!
//! Instructions and data share the same representation: a data cell is a
//! [`Word`] with opcode [`Opcode::Data`] whose value lives in `p`.

use core::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// plain data, never executed
    Data,
    /// never written since boot
    Empty,
    Jmp,
    Jmpi,
    Jmpig,
    Jmpil,
    Jmpie,
    Jmpim,
    Jmpigm,
    Jmpilm,
    Jmpiem,
    Jmpigk,
    Jmpilk,
    Jmpiek,
    Jmpigt,
    Addi,
    Subi,
    Add,
    Sub,
    Mult,
    Ldi,
    Ldd,
    Std,
    Ldx,
    Stx,
    Move,
    Syscall,
    Stop,
}

impl Opcode {
    /// Opcodes whose `p` operand is a direct logical address.
    pub fn addresses_memory(self) -> bool {
        matches!(
            self,
            Opcode::Ldd
                | Opcode::Std
                | Opcode::Jmp
                | Opcode::Jmpim
                | Opcode::Jmpigm
                | Opcode::Jmpilm
                | Opcode::Jmpiem
                | Opcode::Jmpigk
                | Opcode::Jmpilk
                | Opcode::Jmpiek
                | Opcode::Jmpigt
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Data => "DATA",
            Opcode::Empty => "___",
            Opcode::Jmp => "JMP",
            Opcode::Jmpi => "JMPI",
            Opcode::Jmpig => "JMPIG",
            Opcode::Jmpil => "JMPIL",
            Opcode::Jmpie => "JMPIE",
            Opcode::Jmpim => "JMPIM",
            Opcode::Jmpigm => "JMPIGM",
            Opcode::Jmpilm => "JMPILM",
            Opcode::Jmpiem => "JMPIEM",
            Opcode::Jmpigk => "JMPIGK",
            Opcode::Jmpilk => "JMPILK",
            Opcode::Jmpiek => "JMPIEK",
            Opcode::Jmpigt => "JMPIGT",
            Opcode::Addi => "ADDI",
            Opcode::Subi => "SUBI",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mult => "MULT",
            Opcode::Ldi => "LDI",
            Opcode::Ldd => "LDD",
            Opcode::Std => "STD",
            Opcode::Ldx => "LDX",
            Opcode::Stx => "STX",
            Opcode::Move => "MOVE",
            Opcode::Syscall => "SYSCALL",
            Opcode::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Word {
    pub opc: Opcode,
    pub ra: usize,
    pub rb: usize,
    pub p: i32,
}

impl Word {
    /// what physical memory holds before anything is written
    pub const EMPTY: Word = Word::new(Opcode::Empty, 0, 0, -1);

    pub const fn new(opc: Opcode, ra: usize, rb: usize, p: i32) -> Self {
        Self { opc, ra, rb, p }
    }

    pub const fn data(value: i32) -> Self {
        Self::new(Opcode::Data, 0, 0, value)
    }
}

impl Default for Word {
    fn default() -> Self {
        Word::EMPTY
    }
}

impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.opc {
            Opcode::Data => write!(f, "[ DATA, {} ]", self.p),
            Opcode::Empty => write!(f, "[ ___ ]"),
            opc => write!(
                f,
                "[ {}, {}, {}, {} ]",
                opc.mnemonic(),
                self.ra,
                self.rb,
                self.p
            ),
        }
    }
}
