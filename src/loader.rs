//! Built-in programs.
//!
//! There is no file system, so every program a process can run is compiled
//! into the kernel and looked up by name. A program is just an image of
//! [`Word`]s starting at logical address 0.

use crate::config::{SYSCALL_ARG_REG, SYSCALL_REG};
use crate::hw::{Opcode::*, Word, SYSCALL_IN, SYSCALL_OUT};
use lazy_static::*;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Program {
    pub name: &'static str,
    pub image: Arc<[Word]>,
}

impl Program {
    fn new(name: &'static str, image: Vec<Word>) -> Self {
        Self {
            name,
            image: image.into(),
        }
    }

    /// Words the process needs: the image itself, extended so that every
    /// address the code names directly is part of it.
    pub fn required_words(&self) -> usize {
        self.image
            .iter()
            .filter(|word| word.opc.addresses_memory() && word.p >= 0)
            .map(|word| word.p as usize + 1)
            .fold(self.image.len(), usize::max)
    }
}

const fn w(opc: crate::hw::Opcode, ra: usize, rb: usize, p: i32) -> Word {
    Word::new(opc, ra, rb, p)
}

/// pad `code` with zero data up to `len` words
fn padded(mut code: Vec<Word>, len: usize) -> Vec<Word> {
    code.resize(len.max(code.len()), Word::data(0));
    code
}

fn minimal() -> Program {
    Program::new(
        "minimal",
        vec![
            w(Ldi, 0, 0, 999),
            w(Std, 0, 0, 8),
            w(Std, 0, 0, 9),
            w(Std, 0, 0, 10),
            w(Std, 0, 0, 11),
            w(Std, 0, 0, 12),
            w(Stop, 0, 0, 0),
        ],
    )
}

/// 6! into address 10
fn factorial() -> Program {
    Program::new(
        "factorial",
        vec![
            w(Ldi, 0, 0, 6),
            w(Ldi, 1, 0, 1),
            w(Mult, 1, 0, 0),
            w(Subi, 0, 0, 1),
            w(Jmpigk, 0, 0, 2),
            w(Std, 1, 0, 10),
            w(Stop, 0, 0, 0),
        ],
    )
}

/// the first ten fibonacci numbers into 20..30
fn fibonacci10() -> Program {
    let code = vec![
        w(Ldi, 1, 0, 0),
        w(Std, 1, 0, 20),
        w(Ldi, 2, 0, 1),
        w(Std, 2, 0, 21),
        w(Ldi, 0, 0, 22), // r0: next cell
        w(Ldi, 3, 0, 8),  // r3: cells left
        w(Move, 4, 1, 0), // loop
        w(Add, 4, 2, 0),
        w(Stx, 0, 4, 0),
        w(Move, 1, 2, 0),
        w(Move, 2, 4, 0),
        w(Addi, 0, 0, 1),
        w(Subi, 3, 0, 1),
        w(Jmpigk, 0, 3, 6),
        w(Stop, 0, 0, 0),
    ];
    Program::new("fibonacci10", padded(code, 30))
}

/// bubble sort of the six values at 40..46
fn bubble_sort() -> Program {
    let code = vec![
        w(Ldi, 0, 0, 5),   // r0: passes left
        w(Ldi, 1, 0, 40),  // pass: r1 = first cell
        w(Move, 2, 0, 0),  // r2: compares left in this pass
        w(Ldx, 3, 1, 0),   // compare: r3 = m[r1]
        w(Move, 6, 1, 0),
        w(Addi, 6, 0, 1),
        w(Ldx, 4, 6, 0),   // r4 = m[r1 + 1]
        w(Move, 5, 3, 0),
        w(Sub, 5, 4, 0),
        w(Jmpilk, 0, 5, 12), // already in order
        w(Stx, 1, 4, 0),
        w(Stx, 6, 3, 0),
        w(Addi, 1, 0, 1),
        w(Subi, 2, 0, 1),
        w(Jmpigk, 0, 2, 3),
        w(Subi, 0, 0, 1),
        w(Jmpigk, 0, 0, 1),
        w(Stop, 0, 0, 0),
    ];
    let mut image = padded(code, 40);
    image.extend([5, 3, 8, 1, 9, 2].into_iter().map(Word::data));
    Program::new("bubble_sort", image)
}

/// the same sort, then every sorted value out to the console
fn sort_and_print() -> Program {
    let code = vec![
        w(Ldi, 0, 0, 5),
        w(Ldi, 1, 0, 40),
        w(Move, 2, 0, 0),
        w(Ldx, 3, 1, 0),
        w(Move, 6, 1, 0),
        w(Addi, 6, 0, 1),
        w(Ldx, 4, 6, 0),
        w(Move, 5, 3, 0),
        w(Sub, 5, 4, 0),
        w(Jmpilk, 0, 5, 12),
        w(Stx, 1, 4, 0),
        w(Stx, 6, 3, 0),
        w(Addi, 1, 0, 1),
        w(Subi, 2, 0, 1),
        w(Jmpigk, 0, 2, 3),
        w(Subi, 0, 0, 1),
        w(Jmpigk, 0, 0, 1),
        w(Ldi, SYSCALL_REG, 0, SYSCALL_OUT),
        w(Ldi, SYSCALL_ARG_REG, 0, 40),
        w(Ldi, 0, 0, 6),
        w(Syscall, 0, 0, 0), // print loop
        w(Addi, SYSCALL_ARG_REG, 0, 1),
        w(Subi, 0, 0, 1),
        w(Jmpigk, 0, 0, 20),
        w(Stop, 0, 0, 0),
    ];
    let mut image = padded(code, 40);
    image.extend([5, 3, 8, 1, 9, 2].into_iter().map(Word::data));
    Program::new("sort_and_print", image)
}

/// read a value from the console into 10 and write it back out
fn echo() -> Program {
    let code = vec![
        w(Ldi, SYSCALL_REG, 0, SYSCALL_IN),
        w(Ldi, SYSCALL_ARG_REG, 0, 10),
        w(Syscall, 0, 0, 0),
        w(Ldi, SYSCALL_REG, 0, SYSCALL_OUT),
        w(Syscall, 0, 0, 0),
        w(Stop, 0, 0, 0),
    ];
    Program::new("echo", padded(code, 11))
}

fn overflow() -> Program {
    Program::new(
        "overflow",
        vec![w(Ldi, 0, 0, 32767), w(Addi, 0, 0, 1), w(Stop, 0, 0, 0)],
    )
}

fn invalid_access() -> Program {
    Program::new(
        "invalid_access",
        vec![w(Ldi, 0, 0, 500), w(Ldx, 1, 0, 0), w(Stop, 0, 0, 0)],
    )
}

lazy_static! {
    static ref PROGRAMS: BTreeMap<&'static str, Program> = {
        let programs = [
            minimal(),
            factorial(),
            fibonacci10(),
            bubble_sort(),
            sort_and_print(),
            echo(),
            overflow(),
            invalid_access(),
        ];
        programs.into_iter().map(|p| (p.name, p)).collect()
    };
}

pub fn get_program(name: &str) -> Option<Program> {
    PROGRAMS.get(name).cloned()
}

pub fn program_names() -> Vec<&'static str> {
    PROGRAMS.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert!(get_program("factorial").is_some());
        assert!(get_program("nope").is_none());
        assert!(program_names().contains(&"bubble_sort"));
    }

    #[test]
    fn required_words_cover_direct_addresses() {
        let minimal = get_program("minimal").unwrap();
        assert_eq!(minimal.image.len(), 7);
        assert_eq!(minimal.required_words(), 13);
        assert_eq!(get_program("factorial").unwrap().required_words(), 11);
        assert_eq!(get_program("fibonacci10").unwrap().required_words(), 30);
        assert_eq!(get_program("bubble_sort").unwrap().required_words(), 46);
        assert_eq!(get_program("sort_and_print").unwrap().required_words(), 46);
        assert_eq!(get_program("echo").unwrap().required_words(), 11);
    }
}
