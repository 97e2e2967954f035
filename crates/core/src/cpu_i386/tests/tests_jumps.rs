//! Tests for jumps, calls, returns and LEAVE

use super::{cpu_with_program, step};
use crate::cpu_i386::{Eflags, CpuI386, EBP, ESP, FLAG_CF, FLAG_OF, FLAG_SF, FLAG_ZF};

/// Conditional jumps and a flag value that satisfies each of them
const TAKEN: [(u8, u32); 10] = [
    (0x70, FLAG_OF),           // JO
    (0x71, 0),                 // JNO
    (0x72, FLAG_CF),           // JC
    (0x73, 0),                 // JNC
    (0x74, FLAG_ZF),           // JZ
    (0x75, 0),                 // JNZ
    (0x78, FLAG_SF),           // JS
    (0x79, 0),                 // JNS
    (0x7C, FLAG_SF),           // JL
    (0x7E, FLAG_ZF),           // JLE
];

/// The same jumps with a flag value that fails each of them
const NOT_TAKEN: [(u8, u32); 10] = [
    (0x70, 0),
    (0x71, FLAG_OF),
    (0x72, 0),
    (0x73, FLAG_CF),
    (0x74, 0),
    (0x75, FLAG_ZF),
    (0x78, 0),
    (0x79, FLAG_SF),
    (0x7C, FLAG_SF | FLAG_OF),
    (0x7E, FLAG_SF | FLAG_OF),
];

fn run_jcc(opcode: u8, disp: u8, flags: u32) -> CpuI386 {
    let mut cpu = cpu_with_program(&[opcode, disp]);
    cpu.eflags = Eflags(flags);
    step(&mut cpu).unwrap();
    cpu
}

#[test]
fn test_conditional_jumps_taken() {
    for (opcode, flags) in TAKEN {
        let cpu = run_jcc(opcode, 0x05, flags);
        assert_eq!(cpu.eip, 0x7C07, "Jcc {:02X} should jump", opcode);

        let cpu = run_jcc(opcode, 0xF0, flags);
        assert_eq!(cpu.eip, 0x7BF2, "Jcc {:02X} should jump backwards", opcode);
    }
}

#[test]
fn test_conditional_jumps_not_taken_skip_two_bytes() {
    for (opcode, flags) in NOT_TAKEN {
        for disp in [0x00, 0x05, 0x7F, 0x80, 0xFE, 0xFF] {
            let cpu = run_jcc(opcode, disp, flags);
            assert_eq!(
                cpu.eip, 0x7C02,
                "Jcc {:02X} disp {:02X} should fall through",
                opcode, disp
            );
        }
    }
}

#[test]
fn test_jl_uses_sign_xor_overflow() {
    assert_eq!(run_jcc(0x7C, 0x10, FLAG_OF).eip, 0x7C12);
    assert_eq!(run_jcc(0x7C, 0x10, FLAG_SF).eip, 0x7C12);
    assert_eq!(run_jcc(0x7C, 0x10, 0).eip, 0x7C02);
    assert_eq!(run_jcc(0x7C, 0x10, FLAG_SF | FLAG_OF).eip, 0x7C02);
    // ZF alone does not satisfy JL
    assert_eq!(run_jcc(0x7C, 0x10, FLAG_ZF).eip, 0x7C02);
}

#[test]
fn test_jle_uses_zero_or_sign_xor_overflow() {
    assert_eq!(run_jcc(0x7E, 0x10, FLAG_ZF).eip, 0x7C12);
    assert_eq!(run_jcc(0x7E, 0x10, FLAG_OF).eip, 0x7C12);
    assert_eq!(run_jcc(0x7E, 0x10, FLAG_ZF | FLAG_SF | FLAG_OF).eip, 0x7C12);
    assert_eq!(run_jcc(0x7E, 0x10, 0).eip, 0x7C02);
    assert_eq!(run_jcc(0x7E, 0x10, FLAG_SF | FLAG_OF).eip, 0x7C02);
}

#[test]
fn test_jump_short() {
    // JMP short +5
    let mut cpu = cpu_with_program(&[0xEB, 0x05]);
    step(&mut cpu).unwrap();
    assert_eq!(cpu.eip, 0x7C07);

    // JMP short -2 (jumps to itself)
    let mut cpu = cpu_with_program(&[0xEB, 0xFE]);
    step(&mut cpu).unwrap();
    assert_eq!(cpu.eip, 0x7C00);
}

#[test]
fn test_jump_near() {
    // JMP near +0x10
    let mut cpu = cpu_with_program(&[0xE9, 0x10, 0x00, 0x00, 0x00]);
    step(&mut cpu).unwrap();
    assert_eq!(cpu.eip, 0x7C15);

    // JMP near -5 (jumps to itself)
    let mut cpu = cpu_with_program(&[0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
    step(&mut cpu).unwrap();
    assert_eq!(cpu.eip, 0x7C00);
}

#[test]
fn test_call_near() {
    // CALL +5
    let mut cpu = cpu_with_program(&[0xE8, 0x05, 0x00, 0x00, 0x00]);
    step(&mut cpu).unwrap();

    assert_eq!(cpu.eip, 0x7C0A);
    assert_eq!(cpu.read_register32(ESP), 0x7BFC);
    // Return address is the instruction after the CALL
    assert_eq!(cpu.read_memory32(0x7BFC).unwrap(), 0x7C05);
}

#[test]
fn test_call_ret_roundtrip() {
    // CALL +5 ; ... ; RET at the call target
    let mut cpu = cpu_with_program(&[
        0xE8, 0x05, 0x00, 0x00, 0x00, // 7C00: CALL 7C0A
        0x90, 0x90, 0x90, 0x90, 0x90, // 7C05: (return here)
        0xC3, //                         7C0A: RET
    ]);

    step(&mut cpu).unwrap();
    assert_eq!(cpu.eip, 0x7C0A);

    step(&mut cpu).unwrap();
    assert_eq!(cpu.eip, 0x7C05);
    assert_eq!(cpu.read_register32(ESP), 0x7C00);
}

#[test]
fn test_ret_pops_eip() {
    let mut cpu = cpu_with_program(&[0xC3]);
    cpu.write_register32(ESP, 0x6000);
    cpu.write_memory32(0x6000, 0x1234).unwrap();

    step(&mut cpu).unwrap();

    assert_eq!(cpu.eip, 0x1234);
    assert_eq!(cpu.read_register32(ESP), 0x6004);
}

#[test]
fn test_leave() {
    let mut cpu = cpu_with_program(&[0xC9]);
    cpu.write_register32(EBP, 0x7000);
    cpu.write_register32(ESP, 0x6F00);
    cpu.write_memory32(0x7000, 0xAAAA_5555).unwrap();

    step(&mut cpu).unwrap();

    assert_eq!(cpu.read_register32(ESP), 0x7004);
    assert_eq!(cpu.read_register32(EBP), 0xAAAA_5555);
    assert_eq!(cpu.eip, 0x7C01);
}
