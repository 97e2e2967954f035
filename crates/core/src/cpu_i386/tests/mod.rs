//! Tests for the i386 subset CPU
//!
//! - `tests_state`: registers, memory accessors and the stack primitives
//! - `tests_modrm`: ModR/M decoding and r/m operand access
//! - `tests_flags`: flag computation and which instructions touch flags
//! - `tests_jumps`: jumps, calls, returns and LEAVE
//! - `tests_programs`: whole programs run to completion or to a fault

mod tests_jumps;

use super::{CpuError, CpuI386, OpcodeTable, BOOT_LOAD_ADDRESS, DEFAULT_MEMORY_SIZE};
use crate::io::NullPorts;

/// CPU with `program` at 0x7C00, EIP and ESP at 0x7C00
fn cpu_with_program(program: &[u8]) -> CpuI386 {
    let mut cpu = CpuI386::new(DEFAULT_MEMORY_SIZE, BOOT_LOAD_ADDRESS, BOOT_LOAD_ADDRESS);
    cpu.memory.load(BOOT_LOAD_ADDRESS, program).unwrap();
    cpu
}

/// Execute a single instruction with no devices attached
fn step(cpu: &mut CpuI386) -> Result<(), CpuError> {
    cpu.step(&OpcodeTable::new(), &mut NullPorts)
}

/// `JMP rel32` placed at `at` whose target is address 0
fn jmp_to_zero(at: u32) -> [u8; 5] {
    let rel = 0u32.wrapping_sub(at.wrapping_add(5));
    let [b0, b1, b2, b3] = rel.to_le_bytes();
    [0xE9, b0, b1, b2, b3]
}
