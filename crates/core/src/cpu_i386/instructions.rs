//! Opcode table and instruction handlers
//!
//! Each handler is entered with EIP on its opcode byte and is responsible for
//! moving EIP past everything it consumes (or to its jump target).
//!
//! Only SUB and CMP update flags. ADD and INC leave EFLAGS untouched, and so
//! do the data movement, stack and port instructions.

use super::{CpuError, CpuI386, ModRm, EBP, EDX, ESP, AL};
use crate::io::PortIo;
use crate::logging::{log, LogCategory, LogLevel};

/// An instruction handler
pub type Handler = fn(&mut CpuI386, &mut dyn PortIo) -> Result<(), CpuError>;

/// First-byte dispatch table.
///
/// Built once before execution and only read afterwards; share it by
/// reference between runs.
pub struct OpcodeTable {
    handlers: [Option<Handler>; 256],
}

impl OpcodeTable {
    pub fn new() -> Self {
        let mut handlers: [Option<Handler>; 256] = [None; 256];

        handlers[0x01] = Some(add_rm32_r32 as Handler);
        handlers[0x3B] = Some(cmp_r32_rm32);

        handlers[0x70] = Some(jo);
        handlers[0x71] = Some(jno);
        handlers[0x72] = Some(jc);
        handlers[0x73] = Some(jnc);
        handlers[0x74] = Some(jz);
        handlers[0x75] = Some(jnz);
        handlers[0x78] = Some(js);
        handlers[0x79] = Some(jns);
        handlers[0x7C] = Some(jl);
        handlers[0x7E] = Some(jle);

        for i in 0..8 {
            handlers[0x50 + i] = Some(push_r32);
            handlers[0x58 + i] = Some(pop_r32);
            handlers[0xB0 + i] = Some(mov_r8_imm8);
            handlers[0xB8 + i] = Some(mov_r32_imm32);
        }

        handlers[0x68] = Some(push_imm32);
        handlers[0x6A] = Some(push_imm8);
        handlers[0x83] = Some(code_83);
        handlers[0x89] = Some(mov_rm32_r32);
        handlers[0x8B] = Some(mov_r32_rm32);
        handlers[0xC3] = Some(ret);
        handlers[0xC7] = Some(mov_rm32_imm32);
        handlers[0xC9] = Some(leave);
        handlers[0xE8] = Some(call_rel32);
        handlers[0xE9] = Some(near_jump);
        handlers[0xEB] = Some(short_jump);
        handlers[0xEC] = Some(in_al_dx);
        handlers[0xEE] = Some(out_dx_al);
        handlers[0xFF] = Some(code_ff);

        Self { handlers }
    }

    /// Handler registered for `opcode`
    #[inline]
    pub fn get(&self, opcode: u8) -> Option<Handler> {
        self.handlers[opcode as usize]
    }

    pub fn is_implemented(&self, opcode: u8) -> bool {
        self.handlers[opcode as usize].is_some()
    }

    /// Number of opcodes with a handler
    pub fn implemented_count(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Operations of group opcode 0x83 (r/m32, imm8), keyed by ModR/M reg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group83 {
    Add,
    Sub,
    Cmp,
}

impl Group83 {
    pub fn from_reg(reg: u8) -> Option<Self> {
        match reg {
            0 => Some(Group83::Add),
            5 => Some(Group83::Sub),
            7 => Some(Group83::Cmp),
            _ => None,
        }
    }
}

/// Operations of group opcode 0xFF, keyed by ModR/M reg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFf {
    Inc,
}

impl GroupFf {
    pub fn from_reg(reg: u8) -> Option<Self> {
        match reg {
            0 => Some(GroupFf::Inc),
            _ => None,
        }
    }
}

/// Skip the opcode byte and decode the ModR/M operand after it
#[inline]
fn fetch_operand(cpu: &mut CpuI386) -> Result<ModRm, CpuError> {
    cpu.eip = cpu.eip.wrapping_add(1);
    cpu.fetch_modrm()
}

/// Register index encoded in the low 3 bits of the opcode
#[inline]
fn opcode_register(cpu: &CpuI386, base: u8) -> Result<usize, CpuError> {
    Ok(cpu.read_code8(0)?.wrapping_sub(base) as usize)
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// 01 /r: ADD r/m32, r32
fn add_rm32_r32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    let r32 = cpu.get_r32(&modrm);
    let rm32 = cpu.get_rm32(&modrm)?;
    cpu.set_rm32(&modrm, rm32.wrapping_add(r32))
}

/// 3B /r: CMP r32, r/m32
fn cmp_r32_rm32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    let r32 = cpu.get_r32(&modrm);
    let rm32 = cpu.get_rm32(&modrm)?;
    cpu.update_flags_for_subtraction(r32, rm32);
    Ok(())
}

/// 83 /0, /5, /7: ADD, SUB, CMP r/m32, imm8
fn code_83(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    let op = Group83::from_reg(modrm.reg)
        .ok_or_else(|| cpu.unimplemented(0x83, Some(modrm.reg)))?;

    let rm32 = cpu.get_rm32(&modrm)?;
    let imm8 = cpu.read_signed_code8(0)? as u32;
    cpu.eip = cpu.eip.wrapping_add(1);

    match op {
        Group83::Add => cpu.set_rm32(&modrm, rm32.wrapping_add(imm8)),
        Group83::Sub => {
            cpu.set_rm32(&modrm, rm32.wrapping_sub(imm8))?;
            cpu.update_flags_for_subtraction(rm32, imm8);
            Ok(())
        }
        Group83::Cmp => {
            cpu.update_flags_for_subtraction(rm32, imm8);
            Ok(())
        }
    }
}

/// FF /0: INC r/m32
fn code_ff(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    match GroupFf::from_reg(modrm.reg) {
        Some(GroupFf::Inc) => {
            let value = cpu.get_rm32(&modrm)?;
            cpu.set_rm32(&modrm, value.wrapping_add(1))
        }
        None => Err(cpu.unimplemented(0xFF, Some(modrm.reg))),
    }
}

// ---------------------------------------------------------------------------
// Data movement
// ---------------------------------------------------------------------------

/// 89 /r: MOV r/m32, r32
fn mov_rm32_r32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    let r32 = cpu.get_r32(&modrm);
    cpu.set_rm32(&modrm, r32)
}

/// 8B /r: MOV r32, r/m32
fn mov_r32_rm32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    let rm32 = cpu.get_rm32(&modrm)?;
    cpu.set_r32(&modrm, rm32);
    Ok(())
}

/// B0+r ib: MOV r8, imm8
fn mov_r8_imm8(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let reg = opcode_register(cpu, 0xB0)?;
    let value = cpu.read_code8(1)?;
    cpu.write_register8(reg, value);
    cpu.eip = cpu.eip.wrapping_add(2);
    Ok(())
}

/// B8+r id: MOV r32, imm32
fn mov_r32_imm32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let reg = opcode_register(cpu, 0xB8)?;
    let value = cpu.read_code32(1)?;
    cpu.write_register32(reg, value);
    cpu.eip = cpu.eip.wrapping_add(5);
    Ok(())
}

/// C7 /0 id: MOV r/m32, imm32
fn mov_rm32_imm32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let modrm = fetch_operand(cpu)?;
    let value = cpu.read_code32(0)?;
    cpu.eip = cpu.eip.wrapping_add(4);
    cpu.set_rm32(&modrm, value)
}

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

/// 50+r: PUSH r32
fn push_r32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let reg = opcode_register(cpu, 0x50)?;
    cpu.push32(cpu.read_register32(reg))?;
    cpu.eip = cpu.eip.wrapping_add(1);
    Ok(())
}

/// 58+r: POP r32
fn pop_r32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let reg = opcode_register(cpu, 0x58)?;
    let value = cpu.pop32()?;
    cpu.write_register32(reg, value);
    cpu.eip = cpu.eip.wrapping_add(1);
    Ok(())
}

/// 68 id: PUSH imm32
fn push_imm32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let value = cpu.read_code32(1)?;
    cpu.push32(value)?;
    cpu.eip = cpu.eip.wrapping_add(5);
    Ok(())
}

/// 6A ib: PUSH imm8 (zero-extended)
fn push_imm8(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let value = cpu.read_code8(1)? as u32;
    cpu.push32(value)?;
    cpu.eip = cpu.eip.wrapping_add(2);
    Ok(())
}

/// E8 cd: CALL rel32
fn call_rel32(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let diff = cpu.read_signed_code32(1)?;
    cpu.push32(cpu.eip.wrapping_add(5))?;
    cpu.eip = cpu.eip.wrapping_add((diff as u32).wrapping_add(5));
    Ok(())
}

/// C3: RET
fn ret(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    cpu.eip = cpu.pop32()?;
    Ok(())
}

/// C9: LEAVE
fn leave(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let ebp = cpu.read_register32(EBP);
    cpu.write_register32(ESP, ebp);
    let saved = cpu.pop32()?;
    cpu.write_register32(EBP, saved);
    cpu.eip = cpu.eip.wrapping_add(1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

/// EB cb: JMP rel8
fn short_jump(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let diff = cpu.read_signed_code8(1)?;
    cpu.eip = cpu.eip.wrapping_add((diff as u32).wrapping_add(2));
    Ok(())
}

/// E9 cd: JMP rel32
fn near_jump(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let diff = cpu.read_signed_code32(1)?;
    cpu.eip = cpu.eip.wrapping_add((diff as u32).wrapping_add(5));
    Ok(())
}

/// Jcc rel8: the displacement byte is always consumed
#[inline]
fn short_jump_if(cpu: &mut CpuI386, condition: bool) -> Result<(), CpuError> {
    let diff = cpu.read_signed_code8(1)? as u32;
    let step = if condition { diff.wrapping_add(2) } else { 2 };
    cpu.eip = cpu.eip.wrapping_add(step);
    Ok(())
}

/// 70 cb: JO rel8
fn jo(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, cpu.is_overflow())
}

/// 71 cb: JNO rel8
fn jno(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, !cpu.is_overflow())
}

/// 72 cb: JC rel8
fn jc(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, cpu.is_carry())
}

/// 73 cb: JNC rel8
fn jnc(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, !cpu.is_carry())
}

/// 74 cb: JZ rel8
fn jz(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, cpu.is_zero())
}

/// 75 cb: JNZ rel8
fn jnz(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, !cpu.is_zero())
}

/// 78 cb: JS rel8
fn js(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, cpu.is_sign())
}

/// 79 cb: JNS rel8
fn jns(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, !cpu.is_sign())
}

/// 7C cb: JL rel8
fn jl(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, cpu.eflags.is_less())
}

/// 7E cb: JLE rel8
fn jle(cpu: &mut CpuI386, _ports: &mut dyn PortIo) -> Result<(), CpuError> {
    short_jump_if(cpu, cpu.eflags.is_less_or_equal())
}

// ---------------------------------------------------------------------------
// Port I/O
// ---------------------------------------------------------------------------

/// EC: IN AL, DX
fn in_al_dx(cpu: &mut CpuI386, ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let port = cpu.read_register32(EDX) as u16;
    let value = ports.port_in8(port);
    log(LogCategory::IO, LogLevel::Trace, || {
        format!("IO: IN {:04X} -> {:02X}", port, value)
    });
    cpu.write_register8(AL, value);
    cpu.eip = cpu.eip.wrapping_add(1);
    Ok(())
}

/// EE: OUT DX, AL
fn out_dx_al(cpu: &mut CpuI386, ports: &mut dyn PortIo) -> Result<(), CpuError> {
    let port = cpu.read_register32(EDX) as u16;
    let value = cpu.read_register8(AL);
    log(LogCategory::IO, LogLevel::Trace, || {
        format!("IO: OUT {:04X} <- {:02X}", port, value)
    });
    ports.port_out8(port, value);
    cpu.eip = cpu.eip.wrapping_add(1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_contents() {
        let table = OpcodeTable::new();

        for opcode in [0x01, 0x3B, 0x68, 0x6A, 0x83, 0x89, 0x8B, 0xC3, 0xC7, 0xC9] {
            assert!(table.is_implemented(opcode), "{:02X}", opcode);
        }
        for opcode in [0xE8, 0xE9, 0xEB, 0xEC, 0xEE, 0xFF] {
            assert!(table.is_implemented(opcode), "{:02X}", opcode);
        }
        for opcode in 0x50..=0x5F {
            assert!(table.is_implemented(opcode));
        }
        for opcode in 0xB0..=0xBF {
            assert!(table.is_implemented(opcode));
        }
        for opcode in [0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x78, 0x79, 0x7C, 0x7E] {
            assert!(table.is_implemented(opcode));
        }

        // JBE/JA, JP/JNP, JGE/JG are not part of the subset
        for opcode in [0x76, 0x77, 0x7A, 0x7B, 0x7D, 0x7F] {
            assert!(!table.is_implemented(opcode));
        }
        assert!(!table.is_implemented(0x00));
        assert!(!table.is_implemented(0xD6));
        assert!(!table.is_implemented(0x0F));

        assert_eq!(table.implemented_count(), 16 + 16 + 10 + 16);
    }

    #[test]
    fn test_group_83_variants() {
        assert_eq!(Group83::from_reg(0), Some(Group83::Add));
        assert_eq!(Group83::from_reg(5), Some(Group83::Sub));
        assert_eq!(Group83::from_reg(7), Some(Group83::Cmp));
        for reg in [1, 2, 3, 4, 6] {
            assert_eq!(Group83::from_reg(reg), None);
        }
    }

    #[test]
    fn test_group_ff_variants() {
        assert_eq!(GroupFf::from_reg(0), Some(GroupFf::Inc));
        for reg in 1..8 {
            assert_eq!(GroupFf::from_reg(reg), None);
        }
    }
}
